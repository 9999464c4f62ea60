use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Secret};
use log::warn;
use threescale_operator_core::{
    error::{FieldError, ReconcileError},
    kubernetes::client::ClusterClient,
    reconcilers::{
        mutators::{
            create_only_mutator, defaults_only_secret_mutator, deployment_affinity_mutator,
            deployment_replicas_mutator, deployment_tolerations_mutator,
            generic_backend_mutators, generic_deployment_mutators, pod_disruption_budget_mutator,
            ContainerResourcesMutator, EnvVarMutator,
        },
        Mutator, Retry,
    },
    resources::platform::{
        system::{S3_REQUIRED_KEYS, SYSTEM_APP_CONTAINERS},
        FileStorage,
    },
};

use super::{APIManagerLogic, DependencyReconciler};

const S3_SECRET_PATH: &str = "spec.system.fileStorage.simpleStorageService.configurationSecretRef";

static SYSTEM_APP_RESOURCES: ContainerResourcesMutator = ContainerResourcesMutator {
    containers: SYSTEM_APP_CONTAINERS.len(),
};

/// The system tier: storage, services, workloads, configuration and the
/// optional availability and monitoring objects.
pub struct SystemReconciler<'a, C> {
    logic: &'a APIManagerLogic<'a, C>,
}

impl<'a, C> SystemReconciler<'a, C> {
    pub fn new(logic: &'a APIManagerLogic<'a, C>) -> Self {
        Self { logic }
    }
}

impl<'a, C: ClusterClient> SystemReconciler<'a, C> {
    async fn reconcile_file_storage(&self) -> Result<(), ReconcileError> {
        let logic = self.logic;

        if logic
            .api_manager()
            .file_storage()
            .and_then(|storage| storage.deprecated_s3.as_ref())
            .is_some()
        {
            warn!("amazonSimpleStorageService is ignored, use simpleStorageService instead");
        }

        match &logic.platform().file_storage {
            FileStorage::S3 {
                configuration_secret,
            } => self.validate_s3_secret(configuration_secret).await,
            FileStorage::VolumeClaim => {
                logic
                    .converge(
                        logic.platform().generate_system_shared_storage(),
                        &[create_only_mutator()],
                    )
                    .await?;

                Ok(())
            }
        }
    }

    async fn validate_s3_secret(&self, name: &str) -> Result<(), ReconcileError> {
        if name.is_empty() {
            return Err(ReconcileError::InvalidSpec(vec![FieldError::required(
                S3_SECRET_PATH,
                "S3 configuration secret name is empty",
            )]));
        }

        let secret = self
            .logic
            .client()
            .get::<Secret>(name, &self.logic.platform().namespace)
            .await?
            .ok_or_else(|| {
                ReconcileError::InvalidSpec(vec![FieldError::invalid(
                    S3_SECRET_PATH,
                    name,
                    "S3 configuration secret not found",
                )])
            })?;

        let missing = S3_REQUIRED_KEYS
            .iter()
            .filter(|key| !secret_has_key(&secret, key))
            .map(|key| {
                FieldError::invalid(
                    S3_SECRET_PATH,
                    name,
                    format!("S3 configuration secret is missing required key {key}"),
                )
            })
            .collect::<Vec<_>>();

        match missing.is_empty() {
            true => Ok(()),
            false => Err(ReconcileError::InvalidSpec(missing)),
        }
    }
}

fn secret_has_key(secret: &Secret, key: &str) -> bool {
    secret
        .data
        .as_ref()
        .map_or(false, |data| data.contains_key(key))
        || secret
            .string_data
            .as_ref()
            .map_or(false, |data| data.contains_key(key))
}

#[async_trait]
impl<'a, C: ClusterClient> DependencyReconciler for SystemReconciler<'a, C> {
    async fn reconcile(&self) -> Result<Retry, ReconcileError> {
        let logic = self.logic;
        let platform = logic.platform();

        self.reconcile_file_storage().await?;

        for service in [
            platform.generate_system_provider_service(),
            platform.generate_system_master_service(),
            platform.generate_system_developer_service(),
            platform.generate_system_sphinx_service(),
            platform.generate_system_memcache_service(),
        ] {
            logic.converge(service, &[create_only_mutator()]).await?;
        }

        let app_mutators: [&dyn Mutator<Deployment>; 4] = [
            &deployment_replicas_mutator,
            &SYSTEM_APP_RESOURCES,
            &deployment_affinity_mutator,
            &deployment_tolerations_mutator,
        ];
        logic
            .converge(platform.generate_system_app_deployment()?, &app_mutators)
            .await?;

        let env_mutators = S3_REQUIRED_KEYS.map(EnvVarMutator::new);
        let mut sidekiq_mutators: Vec<&dyn Mutator<Deployment>> = generic_deployment_mutators();
        sidekiq_mutators.extend(env_mutators.iter().map(|m| m as &dyn Mutator<Deployment>));
        logic
            .converge(
                platform.generate_system_sidekiq_deployment()?,
                &sidekiq_mutators,
            )
            .await?;

        logic
            .converge(
                platform.generate_system_sphinx_deployment()?,
                &generic_backend_mutators(),
            )
            .await?;

        for config_map in [
            platform.generate_system_config_map(),
            platform.generate_system_environment_config_map(),
        ] {
            logic.converge(config_map, &[create_only_mutator()]).await?;
        }

        for secret in [
            platform.generate_system_smtp_secret(),
            platform.generate_system_events_hook_secret(),
            platform.generate_system_master_apicast_secret(),
            platform.generate_system_seed_secret(),
            platform.generate_system_recaptcha_secret(),
            platform.generate_system_app_secret(),
            platform.generate_system_memcache_secret(),
        ] {
            logic
                .converge(secret, &[&defaults_only_secret_mutator])
                .await?;
        }

        if platform.pod_disruption_budget_enabled {
            for pdb in [
                platform.generate_system_app_pod_disruption_budget(),
                platform.generate_system_sidekiq_pod_disruption_budget(),
            ] {
                logic
                    .converge(pdb, &[&pod_disruption_budget_mutator])
                    .await?;
            }
        }

        if platform.monitoring_enabled {
            for monitor in [
                platform.generate_system_sidekiq_pod_monitor(),
                platform.generate_system_app_pod_monitor(),
            ] {
                logic.converge(monitor, &[create_only_mutator()]).await?;
            }

            for rule in [
                platform.generate_system_app_prometheus_rule(),
                platform.generate_system_sidekiq_prometheus_rule(),
            ] {
                logic.converge(rule, &[create_only_mutator()]).await?;
            }
        }

        Ok(Retry::Never)
    }
}
