use k8s_openapi::api::core::v1::{Affinity, LocalObjectReference, ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::resources::crd::status::ReadinessCondition;

pub const DEFAULT_APP_LABEL: &str = "3scale-api-management";
pub const DEFAULT_TENANT_NAME: &str = "3scale";

#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "apps.3scale.net",
    version = "v1alpha1",
    kind = "APIManager",
    namespaced,
    status = "APIManagerStatus",
    shortname = "apim",
    derive = "Default"
)]
pub struct APIManagerSpec {
    /// wildcard domain the platform routes are published under
    pub wildcard_domain: String,
    /// value of the `app` label put on every generated object
    pub app_label: Option<String>,
    pub tenant_name: Option<String>,
    /// import images of the product image streams from insecure registries
    pub image_stream_tag_import_insecure: Option<bool>,
    /// whether generated workloads carry resource requests and limits
    pub resource_requirements_enabled: Option<bool>,
    /// dependencies run outside of the platform and not managed by the operator
    pub external_components: Option<ExternalComponentsSpec>,
    pub backend: Option<BackendSpec>,
    pub system: Option<SystemSpec>,
    pub pod_disruption_budget: Option<PodDisruptionBudgetSpec>,
    pub monitoring: Option<MonitoringSpec>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalComponentsSpec {
    pub backend: Option<ExternalBackendComponents>,
    pub system: Option<ExternalSystemComponents>,
    pub zync: Option<ExternalZyncComponents>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ExternalBackendComponents {
    pub redis: Option<bool>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ExternalSystemComponents {
    pub database: Option<bool>,
    pub redis: Option<bool>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ExternalZyncComponents {
    pub database: Option<bool>,
}

/// Placement and sizing overrides of a single workload.
#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub replicas: Option<i32>,
    pub affinity: Option<Affinity>,
    pub tolerations: Option<Vec<Toleration>>,
    pub resources: Option<ResourceRequirements>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    pub redis: Option<WorkloadSpec>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemSpec {
    pub app: Option<WorkloadSpec>,
    pub sidekiq: Option<WorkloadSpec>,
    pub sphinx: Option<WorkloadSpec>,
    pub redis: Option<WorkloadSpec>,
    pub database: Option<SystemDatabaseSpec>,
    pub file_storage: Option<FileStorageSpec>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemDatabaseSpec {
    pub mysql: Option<DatabaseSpec>,
    pub postgresql: Option<DatabaseSpec>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    pub image: Option<String>,
    #[serde(flatten)]
    pub workload: WorkloadSpec,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileStorageSpec {
    #[serde(rename = "persistentVolumeClaim")]
    pub pvc: Option<PvcStorageSpec>,
    #[serde(rename = "simpleStorageService")]
    pub s3: Option<S3StorageSpec>,
    /// superseded by `simpleStorageService`, ignored
    #[serde(rename = "amazonSimpleStorageService")]
    pub deprecated_s3: Option<serde_json::Value>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcStorageSpec {
    pub storage_class_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3StorageSpec {
    /// secret holding the AWS credentials, bucket and region
    pub configuration_secret_ref: LocalObjectReference,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct PodDisruptionBudgetSpec {
    pub enabled: Option<bool>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct MonitoringSpec {
    pub enabled: Option<bool>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct APIManagerStatus {
    pub condition: Option<ReadinessCondition>,
    pub observed_generation: Option<i64>,
}

/// Dependencies that may be provided from outside of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalComponent {
    BackendRedis,
    SystemRedis,
    SystemDatabase,
    ZyncDatabase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemDatabase {
    MySql,
    PostgreSql,
}

impl APIManager {
    pub fn is_external(&self, component: ExternalComponent) -> bool {
        let external = match self.spec.external_components.as_ref() {
            Some(external) => external,
            None => return false,
        };

        let flag = match component {
            ExternalComponent::BackendRedis => external.backend.as_ref().and_then(|b| b.redis),
            ExternalComponent::SystemRedis => external.system.as_ref().and_then(|s| s.redis),
            ExternalComponent::SystemDatabase => {
                external.system.as_ref().and_then(|s| s.database)
            }
            ExternalComponent::ZyncDatabase => external.zync.as_ref().and_then(|z| z.database),
        };

        flag.unwrap_or(false)
    }

    /// MySQL unless PostgreSQL is explicitly requested.
    pub fn system_database(&self) -> SystemDatabase {
        match self
            .spec
            .system
            .as_ref()
            .and_then(|system| system.database.as_ref())
            .and_then(|database| database.postgresql.as_ref())
        {
            Some(_) => SystemDatabase::PostgreSql,
            None => SystemDatabase::MySql,
        }
    }

    pub fn is_system_mysql_enabled(&self) -> bool {
        !self.is_external(ExternalComponent::SystemDatabase)
            && self.system_database() == SystemDatabase::MySql
    }

    pub fn is_system_postgresql_enabled(&self) -> bool {
        !self.is_external(ExternalComponent::SystemDatabase)
            && self.system_database() == SystemDatabase::PostgreSql
    }

    pub fn is_pod_disruption_budget_enabled(&self) -> bool {
        self.spec
            .pod_disruption_budget
            .as_ref()
            .and_then(|pdb| pdb.enabled)
            .unwrap_or(false)
    }

    pub fn is_monitoring_enabled(&self) -> bool {
        self.spec
            .monitoring
            .as_ref()
            .and_then(|monitoring| monitoring.enabled)
            .unwrap_or(false)
    }

    pub fn file_storage(&self) -> Option<&FileStorageSpec> {
        self.spec
            .system
            .as_ref()
            .and_then(|system| system.file_storage.as_ref())
    }
}
