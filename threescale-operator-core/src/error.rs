use std::{borrow::Cow, fmt::Display};

use thiserror::Error;

use crate::{kubernetes::client::ClientError, resources::ResourceGenerationError};

/// A single problem with one field of a custom resource, addressed by its
/// path (e.g. `spec.developerAccountRef`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub value: String,
    pub detail: String,
}

impl FieldError {
    pub fn invalid(
        path: impl Into<String>,
        value: impl Display,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            value: value.to_string(),
            detail: detail.into(),
        }
    }

    pub fn required(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: String::new(),
            detail: detail.into(),
        }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value.is_empty() {
            true => write!(f, "{}: Required value: {}", self.path, self.detail),
            false => write!(
                f,
                "{}: Invalid value: \"{}\": {}",
                self.path, self.value, self.detail
            ),
        }
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|error| error.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// User-fixable spec problem, retrying won't help.
    InvalidSpec,
    /// A referenced resource is missing or not ready yet.
    Orphan,
    /// The desired-state builder broke one of its own invariants.
    Structural,
    /// A cluster call failed or was cancelled.
    Infra,
    Other,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Invalid spec! {}", join_field_errors(.0))]
    InvalidSpec(Vec<FieldError>),
    #[error("Orphan resource! {}", join_field_errors(.0))]
    Orphan(Vec<FieldError>),
    #[error("{object} violates a structural invariant: {detail}")]
    Structural { object: String, detail: String },
    #[error("Cluster call failed! Reason: {}", .0)]
    Infra(ClientError),
    #[error("'{}' resource contains invalid data!", .0)]
    InvalidObjectData(Cow<'static, str>),
    #[error("'{}' resource is missing required data!", .0)]
    MissingObjectData(Cow<'static, str>),
    #[error("Couldn't generate the desired state! Reason: {}", .0)]
    ResourceGeneration(ResourceGenerationError),
    #[error("Developer portal call failed! Reason: {}", .0)]
    Portal(String),
    #[error("{step}: {source}")]
    Step {
        step: Cow<'static, str>,
        source: Box<ReconcileError>,
    },
    #[error("Failed to reconcile: {}. Failed to update status: {source}", .primary.as_deref().unwrap_or("none"))]
    StatusWrite {
        primary: Option<String>,
        source: ClientError,
    },
}

impl ReconcileError {
    pub fn structural(object: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Structural {
            object: object.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::InvalidSpec(_) => ErrorKind::InvalidSpec,
            ReconcileError::Orphan(_) => ErrorKind::Orphan,
            ReconcileError::Structural { .. } => ErrorKind::Structural,
            ReconcileError::Infra(_) | ReconcileError::StatusWrite { .. } => ErrorKind::Infra,
            ReconcileError::Step { source, .. } => source.kind(),
            ReconcileError::InvalidObjectData(_)
            | ReconcileError::MissingObjectData(_)
            | ReconcileError::ResourceGeneration(_)
            | ReconcileError::Portal(_) => ErrorKind::Other,
        }
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ReconcileError::InvalidSpec(errors) | ReconcileError::Orphan(errors) => errors,
            ReconcileError::Step { source, .. } => source.field_errors(),
            _ => &[],
        }
    }

    pub fn is_invalid_spec(&self) -> bool {
        self.kind() == ErrorKind::InvalidSpec
    }

    pub fn is_orphan(&self) -> bool {
        self.kind() == ErrorKind::Orphan
    }

    /// Annotates the error with the name of the step that produced it. Errors
    /// that already carry a step name are left alone.
    pub fn in_step(self, step: impl Into<Cow<'static, str>>) -> Self {
        match self {
            ReconcileError::Step { .. } => self,
            other => ReconcileError::Step {
                step: step.into(),
                source: Box::new(other),
            },
        }
    }
}

impl From<ClientError> for ReconcileError {
    fn from(error: ClientError) -> Self {
        ReconcileError::Infra(error)
    }
}

impl From<ResourceGenerationError> for ReconcileError {
    fn from(error: ResourceGenerationError) -> Self {
        ReconcileError::ResourceGeneration(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_annotation_keeps_the_inner_kind() {
        let error = ReconcileError::Orphan(vec![FieldError::invalid(
            "spec.developerAccountRef",
            "acme",
            "parent account resource not found",
        )])
        .in_step("Upgrading images");

        assert!(error.is_orphan());
        assert!(!error.is_invalid_spec());
        assert_eq!(error.field_errors().len(), 1);
        assert!(error
            .to_string()
            .starts_with("Upgrading images: Orphan resource!"));
    }

    #[test]
    fn step_annotation_is_applied_once() {
        let error = ReconcileError::structural("Deployment ns/x", "no containers")
            .in_step("inner")
            .in_step("outer");

        assert!(error.to_string().starts_with("inner:"));
    }

    #[test]
    fn field_errors_render_like_validation_messages() {
        let error = ReconcileError::InvalidSpec(vec![
            FieldError::invalid("spec.role", "owner", "must be one of admin, member"),
            FieldError::required("spec.username", "username must not be empty"),
        ]);

        assert_eq!(
            error.to_string(),
            "Invalid spec! spec.role: Invalid value: \"owner\": must be one of admin, member, \
             spec.username: Required value: username must not be empty"
        );
    }

    #[test]
    fn status_write_failures_are_transient() {
        let error = ReconcileError::StatusWrite {
            primary: Some("boom".to_owned()),
            source: ClientError::Cancelled,
        };

        assert_eq!(error.kind(), ErrorKind::Infra);
        assert!(error.to_string().contains("boom"));
    }
}
