use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// `image.openshift.io/v1` image stream, consumed but not owned by this crate.
#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "image.openshift.io",
    version = "v1",
    kind = "ImageStream",
    namespaced,
    schema = "disabled",
    derive = "Default"
)]
pub struct ImageStreamSpec {
    pub lookup_policy: Option<ImageLookupPolicy>,
    pub docker_image_repository: Option<String>,
    pub tags: Option<Vec<TagReference>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ImageLookupPolicy {
    pub local: bool,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TagReference {
    pub name: String,
    pub annotations: Option<BTreeMap<String, String>>,
    pub from: Option<ObjectReference>,
    pub import_policy: Option<TagImportPolicy>,
    pub reference_policy: Option<TagReferencePolicy>,
    pub generation: Option<i64>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct TagImportPolicy {
    pub insecure: Option<bool>,
    pub scheduled: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct TagReferencePolicy {
    #[serde(rename = "type")]
    pub type_: String,
}

pub const REFERENCE_POLICY_SOURCE: &str = "Source";
pub const REFERENCE_POLICY_LOCAL: &str = "Local";

impl TagReference {
    /// Tag pulling `image` from an external registry.
    pub fn docker_image(name: impl Into<String>, image: impl Into<String>, insecure: bool) -> Self {
        Self {
            name: name.into(),
            annotations: None,
            from: Some(ObjectReference {
                kind: Some("DockerImage".to_owned()),
                name: Some(image.into()),
                ..Default::default()
            }),
            import_policy: Some(TagImportPolicy {
                insecure: Some(insecure),
                scheduled: None,
            }),
            reference_policy: Some(TagReferencePolicy {
                type_: REFERENCE_POLICY_SOURCE.to_owned(),
            }),
            generation: None,
        }
    }

    /// Tag following another tag of the same stream.
    pub fn alias(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: None,
            from: Some(ObjectReference {
                kind: Some("ImageStreamTag".to_owned()),
                name: Some(target.into()),
                ..Default::default()
            }),
            import_policy: None,
            reference_policy: Some(TagReferencePolicy {
                type_: REFERENCE_POLICY_SOURCE.to_owned(),
            }),
            generation: None,
        }
    }
}

impl ImageStream {
    pub fn tag(&self, name: &str) -> Option<&TagReference> {
        self.spec.tags.as_ref()?.iter().find(|tag| tag.name == name)
    }
}
