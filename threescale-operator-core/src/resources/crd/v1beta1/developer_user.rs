use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{error::FieldError, resources::crd::status::ReadinessCondition};

use super::LocalReference;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MEMBER: &str = "member";

#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "capabilities.3scale.net",
    version = "v1beta1",
    kind = "DeveloperUser",
    namespaced,
    status = "DeveloperUserStatus",
    derive = "Default"
)]
pub struct DeveloperUserSpec {
    pub username: String,
    pub email: String,
    /// secret holding the `password` of the user
    pub password_credentials_ref: LocalReference,
    /// developer account the user belongs to
    pub developer_account_ref: LocalReference,
    /// secret with the provider account credentials, the default one when missing
    pub provider_account_ref: Option<LocalReference>,
    /// `admin` or `member`, `member` when missing
    pub role: Option<String>,
    pub suspended: Option<bool>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperUserStatus {
    pub condition: Option<ReadinessCondition>,
    pub developer_user_id: Option<i64>,
    pub developer_account_id: Option<i64>,
    pub provider_account_host: Option<String>,
    pub state: Option<String>,
    pub observed_generation: Option<i64>,
}

impl DeveloperUserSpec {
    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or(ROLE_MEMBER)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.unwrap_or(false)
    }
}

impl DeveloperUser {
    /// Checks the spec constraints the schema alone can't express.
    pub fn validate(&self) -> Vec<FieldError> {
        let spec = &self.spec;
        let mut errors = Vec::new();

        if spec.username.trim().is_empty() {
            errors.push(FieldError::required("spec.username", "username must not be empty"));
        }

        if spec.email.trim().is_empty() {
            errors.push(FieldError::required("spec.email", "email must not be empty"));
        } else if !spec.email.contains('@') {
            errors.push(FieldError::invalid("spec.email", &spec.email, "email must contain '@'"));
        }

        if let Some(role) = spec.role.as_deref() {
            if role != ROLE_ADMIN && role != ROLE_MEMBER {
                errors.push(FieldError::invalid("spec.role", role, "must be one of admin, member"));
            }
        }

        if spec.developer_account_ref.name.is_empty() {
            errors.push(FieldError::required(
                "spec.developerAccountRef.name",
                "developer account reference must not be empty",
            ));
        }

        if spec.password_credentials_ref.name.is_empty() {
            errors.push(FieldError::required(
                "spec.passwordCredentialsRef.name",
                "password secret reference must not be empty",
            ));
        }

        errors
    }
}
