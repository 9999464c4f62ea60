use log::debug;

use crate::{
    error::ReconcileError,
    helpers::object_info,
    resources::crd::openshift::{ImageStream, TagReference},
};

/// Makes sure every desired tag exists and points where the desired one
/// does. Tags only present in the stored stream are kept.
pub fn image_stream_mutator(
    desired: &ImageStream,
    existing: &mut ImageStream,
) -> Result<bool, ReconcileError> {
    let existing_tags = existing.spec.tags.get_or_insert_with(Vec::new);
    let mut changed = false;

    for desired_tag in desired.spec.tags.iter().flatten() {
        match existing_tags
            .iter_mut()
            .find(|tag| tag.name == desired_tag.name)
        {
            Some(existing_tag) => {
                if update_tag(existing_tag, desired_tag) {
                    debug!("{} tag {} changed", object_info(desired), desired_tag.name);
                    changed = true;
                }
            }
            None => {
                debug!("{} tag {} added", object_info(desired), desired_tag.name);
                existing_tags.push(desired_tag.to_owned());
                changed = true;
            }
        }
    }

    Ok(changed)
}

fn update_tag(existing: &mut TagReference, desired: &TagReference) -> bool {
    let mut changed = false;

    if existing.from != desired.from {
        existing.from = desired.from.to_owned();
        changed = true;
    }

    if existing.import_policy != desired.import_policy {
        existing.import_policy = desired.import_policy.to_owned();
        changed = true;
    }

    if existing.reference_policy != desired.reference_policy {
        existing.reference_policy = desired.reference_policy.to_owned();
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use kube::core::ObjectMeta;

    use crate::resources::crd::openshift::ImageStreamSpec;

    use super::*;

    fn stream(tags: Vec<TagReference>) -> ImageStream {
        ImageStream {
            metadata: ObjectMeta {
                name: Some("amp-zync".to_owned()),
                namespace: Some("3scale".to_owned()),
                ..Default::default()
            },
            spec: ImageStreamSpec {
                tags: Some(tags),
                ..Default::default()
            },
        }
    }

    #[test]
    fn moved_tags_are_repointed_and_extra_tags_kept() {
        let desired = stream(vec![
            TagReference::alias("latest", "2.9"),
            TagReference::docker_image("2.9", "registry.example.com/zync:2.9", false),
        ]);
        let mut existing = stream(vec![
            TagReference::alias("latest", "2.8"),
            TagReference::docker_image("2.8", "registry.example.com/zync:2.8", false),
        ]);

        assert!(image_stream_mutator(&desired, &mut existing).unwrap());
        assert!(!image_stream_mutator(&desired, &mut existing).unwrap());

        let names = existing
            .spec
            .tags
            .iter()
            .flatten()
            .map(|tag| tag.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["latest", "2.8", "2.9"]);
        assert_eq!(
            existing
                .tag("latest")
                .and_then(|tag| tag.from.as_ref()?.name.as_deref()),
            Some("2.9")
        );
    }

    #[test]
    fn import_policy_follows_the_desired_tag() {
        let desired = stream(vec![TagReference::docker_image("2.9", "zync:2.9", true)]);
        let mut existing = stream(vec![TagReference::docker_image("2.9", "zync:2.9", false)]);

        assert!(image_stream_mutator(&desired, &mut existing).unwrap());
        assert_eq!(
            existing
                .tag("2.9")
                .and_then(|tag| tag.import_policy.as_ref()?.insecure),
            Some(true)
        );
    }
}
