use std::borrow::Cow;

use thiserror::Error;

pub mod crd;
pub mod labels;
pub mod operator;
pub mod platform;
pub mod triggers;

#[derive(Debug, Error)]
pub enum ResourceGenerationError {
    #[error("Resource is missing required data ({})!", .0)]
    MissingData(Cow<'static, str>),
    #[error("Provided dependent resource is missing a name!")]
    DependentMissingMetadataName,
    #[error("Provided dependent resource is missing a namespace!")]
    DependentMissingMetadataNamespace,
    #[error("Couldn't serialize the image triggers! Reason: {}", .0)]
    TriggerSerialization(serde_json::Error),
}
