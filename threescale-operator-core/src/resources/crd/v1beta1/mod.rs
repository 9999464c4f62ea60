use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod developer_account;
pub mod developer_user;

/// Reference to an object living in the same namespace.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct LocalReference {
    pub name: String,
}
