use k8s_openapi::api::apps::v1::Deployment;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

/// Annotation through which OpenShift rolls out a deployment whenever the
/// referenced image stream tag moves.
pub const IMAGE_TRIGGERS_ANNOTATION: &str = "image.openshift.io/triggers";
pub const IMAGE_STREAM_TAG_KIND: &str = "ImageStreamTag";

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageTrigger {
    pub from: TriggerSource,
    pub field_path: String,
    pub paused: Option<bool>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TriggerSource {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ImageTrigger {
    /// Trigger updating the image of `container` from `stream:tag`.
    pub fn image_change(stream_tag: impl Into<String>, container: &str) -> Self {
        Self {
            from: TriggerSource {
                kind: IMAGE_STREAM_TAG_KIND.to_owned(),
                name: stream_tag.into(),
                namespace: None,
            },
            field_path: format!("spec.template.spec.containers[?(@.name==\"{container}\")].image"),
            paused: None,
        }
    }

    /// Trigger updating the images of every container of the template.
    pub fn image_change_all_containers(stream_tag: impl Into<String>) -> Self {
        Self {
            field_path: "spec.template.spec.containers[*].image".to_owned(),
            ..Self::image_change(stream_tag, "")
        }
    }

    pub fn is_image_change(&self) -> bool {
        self.from.kind == IMAGE_STREAM_TAG_KIND
    }
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("no image change trigger found")]
    Missing,
    #[error("found more than one image change trigger")]
    Ambiguous,
    #[error("image trigger annotation is malformed: {}", .0)]
    Malformed(serde_json::Error),
}

/// Reads the triggers of a deployment, an absent annotation means no triggers.
pub fn read_image_triggers(deployment: &Deployment) -> Result<Vec<ImageTrigger>, TriggerError> {
    match deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(IMAGE_TRIGGERS_ANNOTATION))
    {
        Some(raw) => serde_json::from_str(raw).map_err(TriggerError::Malformed),
        None => Ok(Vec::new()),
    }
}

pub fn write_image_triggers(
    deployment: &mut Deployment,
    triggers: &[ImageTrigger],
) -> Result<(), serde_json::Error> {
    let raw = serde_json::to_string(triggers)?;
    deployment
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(IMAGE_TRIGGERS_ANNOTATION.to_owned(), raw);

    Ok(())
}

/// Position of the one and only image change trigger.
pub fn find_image_change_trigger(triggers: &[ImageTrigger]) -> Result<usize, TriggerError> {
    let mut found = None;

    for (index, trigger) in triggers.iter().enumerate() {
        if trigger.is_image_change() {
            if found.is_some() {
                return Err(TriggerError::Ambiguous);
            }
            found = Some(index);
        }
    }

    found.ok_or(TriggerError::Missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_survive_the_annotation() {
        let mut deployment = Deployment::default();
        let triggers = vec![ImageTrigger::image_change("amp-zync:2.9", "zync")];

        write_image_triggers(&mut deployment, &triggers).unwrap();

        assert_eq!(read_image_triggers(&deployment).unwrap(), triggers);
        assert!(read_image_triggers(&Deployment::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn exactly_one_image_change_trigger_is_required() {
        let trigger = ImageTrigger::image_change("amp-zync:2.9", "zync");

        assert!(matches!(find_image_change_trigger(&[]), Err(TriggerError::Missing)));
        assert!(matches!(
            find_image_change_trigger(&[trigger.clone(), trigger.clone()]),
            Err(TriggerError::Ambiguous)
        ));
        assert_eq!(find_image_change_trigger(&[trigger]).unwrap(), 0);
    }
}
