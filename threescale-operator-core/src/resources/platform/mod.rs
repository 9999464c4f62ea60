use std::collections::BTreeMap;

use derive_builder::Builder;
use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::core::ObjectMeta;
use rand::{distributions::Alphanumeric, thread_rng, Rng};

use super::{
    crd::v1alpha1::api_manager::{
        APIManager, ExternalComponent, SystemDatabase, WorkloadSpec, DEFAULT_APP_LABEL,
        DEFAULT_TENANT_NAME,
    },
    labels::get_component_labels,
    operator::{ComponentImages, OperatorRelease},
};

pub mod images;
pub mod redis;
pub mod system;
pub mod workloads;

/// Dependencies that are run outside of the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExternalComponents {
    pub backend_redis: bool,
    pub system_redis: bool,
    pub system_database: bool,
    pub zync_database: bool,
}

impl ExternalComponents {
    pub fn is_external(&self, component: ExternalComponent) -> bool {
        match component {
            ExternalComponent::BackendRedis => self.backend_redis,
            ExternalComponent::SystemRedis => self.system_redis,
            ExternalComponent::SystemDatabase => self.system_database,
            ExternalComponent::ZyncDatabase => self.zync_database,
        }
    }
}

/// Per-workload overrides taken from the platform resource.
#[derive(Debug, Clone, Default)]
pub struct WorkloadOverrides {
    pub system_app: Option<WorkloadSpec>,
    pub system_sidekiq: Option<WorkloadSpec>,
    pub system_sphinx: Option<WorkloadSpec>,
    pub system_redis: Option<WorkloadSpec>,
    pub backend_redis: Option<WorkloadSpec>,
    pub system_database: Option<WorkloadSpec>,
}

/// Where the system tier keeps uploaded files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FileStorage {
    /// shared `ReadWriteMany` claim
    #[default]
    VolumeClaim,
    /// bucket described by the given configuration secret
    S3 { configuration_secret: String },
}

/// The desired state of one API management platform, derived from an
/// `APIManager` resource and the operator settings.
#[derive(Debug, Clone, Builder)]
pub struct PlatformRelease {
    pub namespace: String,
    pub app_label: String,
    pub tenant_name: String,
    pub wildcard_domain: String,
    pub product_version: String,
    pub images: ComponentImages,
    #[builder(default)]
    pub insecure_import: bool,
    #[builder(default = "true")]
    pub resource_requirements_enabled: bool,
    #[builder(default)]
    pub pod_disruption_budget_enabled: bool,
    #[builder(default)]
    pub monitoring_enabled: bool,
    #[builder(default = "SystemDatabase::MySql")]
    pub system_database: SystemDatabase,
    #[builder(default)]
    pub external: ExternalComponents,
    #[builder(default)]
    pub workloads: WorkloadOverrides,
    #[builder(default)]
    pub file_storage: FileStorage,
    #[builder(default)]
    pub storage_class_name: Option<String>,
}

impl PlatformReleaseBuilder {
    pub fn with_operator(&mut self, operator_release: &OperatorRelease) -> &mut Self {
        self.product_version(operator_release.product_version.to_owned())
            .images(operator_release.images.to_owned())
    }

    pub fn with_api_manager(&mut self, api_manager: &APIManager) -> &mut Self {
        let spec = &api_manager.spec;
        let system = spec.system.as_ref();
        let file_storage = api_manager.file_storage();

        if let Some(namespace) = api_manager.metadata.namespace.as_ref() {
            self.namespace(namespace.to_owned());
        }

        self.app_label(
            spec.app_label
                .to_owned()
                .unwrap_or_else(|| DEFAULT_APP_LABEL.to_owned()),
        )
        .tenant_name(
            spec.tenant_name
                .to_owned()
                .unwrap_or_else(|| DEFAULT_TENANT_NAME.to_owned()),
        )
        .wildcard_domain(spec.wildcard_domain.to_owned())
        .insecure_import(spec.image_stream_tag_import_insecure.unwrap_or(false))
        .resource_requirements_enabled(spec.resource_requirements_enabled.unwrap_or(true))
        .pod_disruption_budget_enabled(api_manager.is_pod_disruption_budget_enabled())
        .monitoring_enabled(api_manager.is_monitoring_enabled())
        .system_database(api_manager.system_database())
        .external(ExternalComponents {
            backend_redis: api_manager.is_external(ExternalComponent::BackendRedis),
            system_redis: api_manager.is_external(ExternalComponent::SystemRedis),
            system_database: api_manager.is_external(ExternalComponent::SystemDatabase),
            zync_database: api_manager.is_external(ExternalComponent::ZyncDatabase),
        })
        .workloads(WorkloadOverrides {
            system_app: system.and_then(|system| system.app.to_owned()),
            system_sidekiq: system.and_then(|system| system.sidekiq.to_owned()),
            system_sphinx: system.and_then(|system| system.sphinx.to_owned()),
            system_redis: system.and_then(|system| system.redis.to_owned()),
            backend_redis: spec
                .backend
                .as_ref()
                .and_then(|backend| backend.redis.to_owned()),
            system_database: system
                .and_then(|system| system.database.as_ref())
                .and_then(|database| match api_manager.system_database() {
                    SystemDatabase::MySql => database.mysql.as_ref(),
                    SystemDatabase::PostgreSql => database.postgresql.as_ref(),
                })
                .map(|database| database.workload.to_owned()),
        })
        .file_storage(
            match file_storage.and_then(|storage| storage.s3.as_ref()) {
                Some(s3) => FileStorage::S3 {
                    configuration_secret: s3
                        .configuration_secret_ref
                        .name
                        .to_owned()
                        .unwrap_or_default(),
                },
                None => FileStorage::VolumeClaim,
            },
        )
        .storage_class_name(
            file_storage
                .and_then(|storage| storage.pvc.as_ref())
                .and_then(|pvc| pvc.storage_class_name.to_owned()),
        )
    }
}

impl PlatformRelease {
    pub fn is_external(&self, component: ExternalComponent) -> bool {
        self.external.is_external(component)
    }

    pub fn is_system_mysql_enabled(&self) -> bool {
        !self.external.system_database && self.system_database == SystemDatabase::MySql
    }

    pub fn is_system_postgresql_enabled(&self) -> bool {
        !self.external.system_database && self.system_database == SystemDatabase::PostgreSql
    }

    pub fn generate_metadata(&self, name: &str, component: &str, element: &str) -> ObjectMeta {
        ObjectMeta {
            labels: Some(get_component_labels(&self.app_label, component, element)),
            namespace: Some(self.namespace.to_owned()),
            name: Some(name.to_owned()),
            ..Default::default()
        }
    }

    /// `stream:tag` every product deployment trigger follows.
    pub fn get_stream_tag(&self, stream: &str) -> String {
        format!("{stream}:{}", self.product_version)
    }

    /// Default requirements unless requirements are disabled for the platform.
    pub(crate) fn resources_or(
        &self,
        overrides: Option<&WorkloadSpec>,
        default: impl FnOnce() -> ResourceRequirements,
    ) -> ResourceRequirements {
        if let Some(resources) = overrides.and_then(|workload| workload.resources.as_ref()) {
            return resources.to_owned();
        }

        match self.resource_requirements_enabled {
            true => default(),
            false => ResourceRequirements::default(),
        }
    }
}

pub fn generate_password(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub(crate) fn string_data(entries: &[(&str, String)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_owned()))
        .collect()
}
