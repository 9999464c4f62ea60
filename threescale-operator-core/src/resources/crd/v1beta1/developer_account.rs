use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::resources::crd::status::ReadinessCondition;

use super::LocalReference;

#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "capabilities.3scale.net",
    version = "v1beta1",
    kind = "DeveloperAccount",
    namespaced,
    status = "DeveloperAccountStatus",
    derive = "Default"
)]
pub struct DeveloperAccountSpec {
    pub org_name: String,
    pub monthly_billing_enabled: Option<bool>,
    pub monthly_charging_enabled: Option<bool>,
    pub provider_account_ref: Option<LocalReference>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperAccountStatus {
    pub condition: Option<ReadinessCondition>,
    pub account_id: Option<i64>,
    pub account_state: Option<String>,
    pub provider_account_host: Option<String>,
    pub observed_generation: Option<i64>,
}

impl DeveloperAccount {
    /// Ready accounts have been created in the portal and carry their id.
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|status| {
                status.account_id.is_some()
                    && status
                        .condition
                        .as_ref()
                        .map(|condition| condition.ready)
                        .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    pub fn account_id(&self) -> Option<i64> {
        self.status.as_ref().and_then(|status| status.account_id)
    }
}
