pub mod error;
pub mod helpers;
pub mod kubernetes;
pub mod reconcilers;
pub mod resources;

pub const APPS_RESOURCE_GROUP: &str = "apps.3scale.net";
pub const CAPABILITIES_RESOURCE_GROUP: &str = "capabilities.3scale.net";

pub const FIELD_MANAGER: &str = "threescale-operator";
