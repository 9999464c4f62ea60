use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Secret},
};
use log::info;
use threescale_operator_core::{
    error::ReconcileError,
    helpers::{object_info, RequireMetadata},
    kubernetes::{client::ClusterClient, ManagedResource},
    reconcilers::{
        mutators::{deployment_image_trigger_mutator, image_stream_mutator, metering_labels_mutator},
        Mutator,
    },
    resources::{
        crd::openshift::ImageStream,
        platform::{
            redis::SYSTEM_REDIS_SECRET,
            system::{SYSTEM_APP, SYSTEM_SIDEKIQ, SYSTEM_SPHINX},
            workloads::MYSQL_EXTRA_CONFIG_MAP,
            PlatformRelease,
        },
        ResourceGenerationError,
    },
};

use crate::dependency::APIManagerLogic;

pub mod pipeline;

use pipeline::{and_then, sequentially, when, Step, StepFuture};

pub const MESSAGE_BUS_ENV_VARS: [&str; 4] = [
    "MESSAGE_BUS_REDIS_URL",
    "MESSAGE_BUS_REDIS_NAMESPACE",
    "MESSAGE_BUS_REDIS_SENTINEL_HOSTS",
    "MESSAGE_BUS_REDIS_SENTINEL_ROLE",
];

pub const MESSAGE_BUS_SECRET_KEYS: [&str; 4] = [
    "MESSAGE_BUS_URL",
    "MESSAGE_BUS_NAMESPACE",
    "MESSAGE_BUS_SENTINEL_HOSTS",
    "MESSAGE_BUS_SENTINEL_ROLE",
];

pub const MYSQL_AUTHENTICATION_PLUGIN_KEY: &str = "mysql-default-authentication-plugin.cnf";
pub const MYSQL_AUTHENTICATION_PLUGIN_CONFIG: &str =
    "[mysqld]\ndefault_authentication_plugin=mysql_native_password\n";

/// Migrates objects left behind by previous product versions.
///
/// Only objects that already exist are touched, creating missing ones is the
/// job of the dependency reconcilers.
pub struct ApiManagerUpgrade<'a, C> {
    logic: &'a APIManagerLogic<'a, C>,
}

impl<'a, C: ClusterClient> ApiManagerUpgrade<'a, C> {
    pub fn new(logic: &'a APIManagerLogic<'a, C>) -> Self {
        Self { logic }
    }

    fn platform(&self) -> &'a PlatformRelease {
        self.logic.platform()
    }

    /// Runs the whole procedure, returning whether another pass is needed
    /// before the platform may be converged.
    pub async fn run(&self) -> Result<bool, ReconcileError> {
        self.pipeline().run(self).await
    }

    fn pipeline(&self) -> Step<Self> {
        sequentially(
            "Upgrade",
            vec![
                sequentially(
                    "Upgrading image streams",
                    vec![
                        Step::new("Product image streams", |upgrade: &Self| {
                            upgrade.product_images()
                        }),
                        when(
                            |upgrade: &Self| !upgrade.platform().external.backend_redis,
                            Step::new("Backend redis image stream", |upgrade: &Self| {
                                upgrade.image(
                                    upgrade.platform().generate_backend_redis_image_stream(),
                                )
                            }),
                        ),
                        when(
                            |upgrade: &Self| !upgrade.platform().external.system_redis,
                            Step::new("System redis image stream", |upgrade: &Self| {
                                upgrade.image(
                                    upgrade.platform().generate_system_redis_image_stream(),
                                )
                            }),
                        ),
                        when(
                            |upgrade: &Self| upgrade.platform().is_system_mysql_enabled(),
                            Step::new("System MySQL image stream", |upgrade: &Self| {
                                upgrade.image(
                                    upgrade.platform().generate_system_mysql_image_stream(),
                                )
                            }),
                        ),
                        when(
                            |upgrade: &Self| upgrade.platform().is_system_postgresql_enabled(),
                            Step::new("System PostgreSQL image stream", |upgrade: &Self| {
                                upgrade.image(
                                    upgrade.platform().generate_system_postgresql_image_stream(),
                                )
                            }),
                        ),
                    ],
                ),
                sequentially(
                    "Upgrading deployment triggers",
                    vec![
                        Step::new("APIcast triggers", |upgrade: &Self| {
                            let platform = upgrade.platform();
                            upgrade.triggers(collect(vec![
                                platform.generate_apicast_staging_deployment(),
                                platform.generate_apicast_production_deployment(),
                            ]))
                        }),
                        Step::new("Backend triggers", |upgrade: &Self| {
                            let platform = upgrade.platform();
                            upgrade.triggers(collect(vec![
                                platform.generate_backend_listener_deployment(),
                                platform.generate_backend_worker_deployment(),
                                platform.generate_backend_cron_deployment(),
                            ]))
                        }),
                        and_then(
                            Step::new("Zync triggers", |upgrade: &Self| {
                                let platform = upgrade.platform();
                                upgrade.triggers(collect(vec![
                                    platform.generate_zync_deployment(),
                                    platform.generate_zync_que_deployment(),
                                ]))
                            }),
                            when(
                                |upgrade: &Self| !upgrade.platform().external.zync_database,
                                Step::new("Zync database trigger", |upgrade: &Self| {
                                    upgrade.triggers(collect(vec![upgrade
                                        .platform()
                                        .generate_zync_database_deployment()]))
                                }),
                            ),
                        ),
                        Step::new("Memcached trigger", |upgrade: &Self| {
                            upgrade.triggers(collect(vec![upgrade
                                .platform()
                                .generate_memcached_deployment()]))
                        }),
                        Step::new("System triggers", |upgrade: &Self| {
                            let platform = upgrade.platform();
                            upgrade.triggers(collect(vec![
                                platform.generate_system_app_deployment(),
                                platform.generate_system_sidekiq_deployment(),
                                platform.generate_system_sphinx_deployment(),
                            ]))
                        }),
                        when(
                            |upgrade: &Self| !upgrade.platform().external.backend_redis,
                            Step::new("Backend redis trigger", |upgrade: &Self| {
                                upgrade.triggers(collect(vec![upgrade
                                    .platform()
                                    .generate_backend_redis_deployment()]))
                            }),
                        ),
                        when(
                            |upgrade: &Self| !upgrade.platform().external.system_redis,
                            Step::new("System redis trigger", |upgrade: &Self| {
                                upgrade.triggers(collect(vec![upgrade
                                    .platform()
                                    .generate_system_redis_deployment()]))
                            }),
                        ),
                        when(
                            |upgrade: &Self| upgrade.platform().is_system_mysql_enabled(),
                            Step::new("System MySQL trigger", |upgrade: &Self| {
                                upgrade.triggers(collect(vec![upgrade
                                    .platform()
                                    .generate_system_mysql_deployment()]))
                            }),
                        ),
                        when(
                            |upgrade: &Self| upgrade.platform().is_system_postgresql_enabled(),
                            Step::new("System PostgreSQL trigger", |upgrade: &Self| {
                                upgrade.triggers(collect(vec![upgrade
                                    .platform()
                                    .generate_system_postgresql_deployment()]))
                            }),
                        ),
                    ],
                ),
                Step::new("Upgrading metering labels", |upgrade: &Self| {
                    upgrade.metering_labels()
                }),
                Step::new("Removing message bus configuration", |upgrade: &Self| {
                    upgrade.message_bus()
                }),
                when(
                    |upgrade: &Self| upgrade.platform().is_system_mysql_enabled(),
                    Step::new("MySQL authentication plugin", |upgrade: &Self| {
                        upgrade.mysql_authentication_plugin()
                    }),
                ),
            ],
        )
    }

    /// Applies `mutator` to the stored copy of `desired`, if there is one.
    async fn upgrade_existing<K: ManagedResource>(
        &self,
        desired: &K,
        mutator: &dyn Mutator<K>,
    ) -> Result<bool, ReconcileError> {
        let name = desired.require_name_or_else(|| {
            ReconcileError::structural(object_info(desired), "metadata.name is required")
        })?;
        let Some(mut existing) = self.get_existing::<K>(name).await? else {
            return Ok(false);
        };

        if !mutator.mutate(desired, &mut existing)? {
            return Ok(false);
        }

        self.logic.client().update(&existing).await?;
        info!("Upgraded {}", object_info(&existing));

        Ok(true)
    }

    async fn get_existing<K: ManagedResource>(
        &self,
        name: &str,
    ) -> Result<Option<K>, ReconcileError> {
        Ok(self
            .logic
            .client()
            .get::<K>(name, &self.platform().namespace)
            .await?)
    }

    fn product_images(&self) -> StepFuture<'_> {
        Box::pin(async move {
            for stream in self.platform().generate_product_image_streams() {
                self.upgrade_existing(&stream, &image_stream_mutator).await?;
            }

            Ok(false)
        })
    }

    fn image(&self, stream: ImageStream) -> StepFuture<'_> {
        Box::pin(async move {
            self.upgrade_existing(&stream, &image_stream_mutator).await?;

            Ok(false)
        })
    }

    fn triggers(
        &self,
        deployments: Result<Vec<Deployment>, ResourceGenerationError>,
    ) -> StepFuture<'_> {
        Box::pin(async move {
            let mut changed = false;
            for deployment in deployments? {
                changed = self
                    .upgrade_existing(&deployment, &deployment_image_trigger_mutator)
                    .await?
                    || changed;
            }

            Ok(changed)
        })
    }

    fn metering_labels(&self) -> StepFuture<'_> {
        Box::pin(async move {
            let mut changed = false;
            for deployment in self.platform().generate_all_deployments()? {
                changed = self
                    .upgrade_existing(&deployment, metering_labels_mutator())
                    .await?
                    || changed;
            }

            Ok(changed)
        })
    }

    fn message_bus(&self) -> StepFuture<'_> {
        Box::pin(async move {
            for name in [SYSTEM_APP, SYSTEM_SIDEKIQ, SYSTEM_SPHINX] {
                let Some(mut deployment) = self.get_existing::<Deployment>(name).await? else {
                    continue;
                };

                if delete_env_vars(&mut deployment, &MESSAGE_BUS_ENV_VARS) {
                    self.logic.client().update(&deployment).await?;
                    info!(
                        "Removed message bus settings from {}",
                        object_info(&deployment)
                    );
                }
            }

            if !self.platform().external.system_redis {
                if let Some(mut secret) = self.get_existing::<Secret>(SYSTEM_REDIS_SECRET).await? {
                    if delete_secret_keys(&mut secret, &MESSAGE_BUS_SECRET_KEYS) {
                        self.logic.client().update(&secret).await?;
                        info!("Removed message bus settings from {}", object_info(&secret));
                    }
                }
            }

            Ok(false)
        })
    }

    fn mysql_authentication_plugin(&self) -> StepFuture<'_> {
        Box::pin(async move {
            let Some(mut config_map) = self.get_existing::<ConfigMap>(MYSQL_EXTRA_CONFIG_MAP)
                .await?
            else {
                return Ok(false);
            };

            let data = config_map.data.get_or_insert_with(Default::default);
            if data.contains_key(MYSQL_AUTHENTICATION_PLUGIN_KEY) {
                return Ok(false);
            }

            data.insert(
                MYSQL_AUTHENTICATION_PLUGIN_KEY.to_owned(),
                MYSQL_AUTHENTICATION_PLUGIN_CONFIG.to_owned(),
            );
            self.logic.client().update(&config_map).await?;
            info!(
                "Added the default authentication plugin to {}",
                object_info(&config_map)
            );

            Ok(false)
        })
    }
}

fn collect(
    deployments: Vec<Result<Deployment, ResourceGenerationError>>,
) -> Result<Vec<Deployment>, ResourceGenerationError> {
    deployments.into_iter().collect()
}

/// Drops the named env vars from every container and init container of the
/// pod template.
pub fn delete_env_vars(deployment: &mut Deployment, names: &[&str]) -> bool {
    let Some(pod_spec) = deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
    else {
        return false;
    };

    let mut changed = false;
    let init_containers = pod_spec.init_containers.iter_mut().flatten();
    for container in pod_spec.containers.iter_mut().chain(init_containers) {
        if let Some(env) = container.env.as_mut() {
            let before = env.len();
            env.retain(|var| !names.contains(&var.name.as_str()));
            changed = changed || env.len() != before;
        }
    }

    changed
}

pub fn delete_secret_keys(secret: &mut Secret, keys: &[&str]) -> bool {
    let mut changed = false;

    for key in keys {
        if let Some(data) = secret.data.as_mut() {
            changed = data.remove(*key).is_some() || changed;
        }
        if let Some(string_data) = secret.string_data.as_mut() {
            changed = string_data.remove(*key).is_some() || changed;
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::{api::core::v1::EnvVar, ByteString};
    use kube::core::ObjectMeta;
    use threescale_operator_core::{
        kubernetes::memory::{InMemoryClusterClient, Verb},
        resources::{
            labels::OBSOLETE_METERING_LABELS,
            platform::{redis::RedisFlavor, workloads::env},
            triggers::{read_image_triggers, write_image_triggers},
        },
    };

    use crate::dependency::tests::{api_manager, platform};

    use super::*;

    fn env_names(deployment: &Deployment) -> Vec<String> {
        let spec = deployment.spec.as_ref().unwrap();
        let pod = spec.template.spec.as_ref().unwrap();
        let env = pod.containers[0].env.clone().unwrap_or_default();
        env.iter()
            .map(|var| format!("{}={}", var.name, var.value.as_deref().unwrap_or_default()))
            .collect()
    }

    fn with_env(mut deployment: Deployment, vars: Vec<EnvVar>) -> Deployment {
        let spec = deployment.spec.as_mut().unwrap();
        spec.template.spec.as_mut().unwrap().containers[0].env = Some(vars);
        deployment
    }

    #[test]
    fn env_var_removal_is_idempotent() {
        let platform = platform(&api_manager(serde_json::json!({})));
        let mut deployment = with_env(
            platform.generate_system_sphinx_deployment().unwrap(),
            vec![env("A", "1"), env("B", "2")],
        );

        assert!(delete_env_vars(&mut deployment, &["B"]));
        assert_eq!(env_names(&deployment), vec!["A=1"]);
        assert!(!delete_env_vars(&mut deployment, &["B"]));
        assert_eq!(env_names(&deployment), vec!["A=1"]);
    }

    #[test]
    fn secret_keys_are_removed_from_both_maps() {
        let mut secret = Secret {
            data: Some(BTreeMap::from([
                ("URL".to_owned(), ByteString(b"redis://system-redis".to_vec())),
                ("MESSAGE_BUS_URL".to_owned(), ByteString(Vec::new())),
            ])),
            string_data: Some(BTreeMap::from([(
                "MESSAGE_BUS_NAMESPACE".to_owned(),
                String::new(),
            )])),
            ..Default::default()
        };

        assert!(delete_secret_keys(&mut secret, &MESSAGE_BUS_SECRET_KEYS));
        assert_eq!(secret.data.as_ref().unwrap().len(), 1);
        assert!(secret.string_data.as_ref().unwrap().is_empty());
        assert!(!delete_secret_keys(&mut secret, &MESSAGE_BUS_SECRET_KEYS));
    }

    #[tokio::test]
    async fn nothing_to_migrate_on_an_empty_cluster() {
        let client = InMemoryClusterClient::new();
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();

        let requeue = ApiManagerUpgrade::new(&logic).run().await.unwrap();

        assert!(!requeue);
        assert_eq!(client.writes(), 0);
    }

    #[tokio::test]
    async fn stale_trigger_is_fixed_and_asks_for_another_pass() {
        let client = InMemoryClusterClient::new();
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();
        let mut stale = platform.generate_backend_worker_deployment().unwrap();
        let mut triggers = read_image_triggers(&stale).unwrap();
        triggers[0].from.name = "amp-backend:2.11".to_owned();
        write_image_triggers(&mut stale, &triggers).unwrap();
        client.insert(&stale);

        let first = ApiManagerUpgrade::new(&logic).run().await.unwrap();
        let second = ApiManagerUpgrade::new(&logic).run().await.unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(client.writes(), 1);
        let stored = client
            .fetch::<Deployment>("backend-worker", "3scale")
            .unwrap();
        assert_eq!(
            read_image_triggers(&stored).unwrap()[0].from.name,
            platform.get_stream_tag("amp-backend")
        );
    }

    #[tokio::test]
    async fn obsolete_metering_labels_are_dropped() {
        let client = InMemoryClusterClient::new();
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();
        let mut deployment = platform.generate_zync_deployment().unwrap();
        deployment
            .spec
            .as_mut()
            .unwrap()
            .template
            .metadata
            .get_or_insert_with(ObjectMeta::default)
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(OBSOLETE_METERING_LABELS[0].to_owned(), "true".to_owned());
        client.insert(&deployment);

        assert!(ApiManagerUpgrade::new(&logic).run().await.unwrap());

        let stored = client.fetch::<Deployment>("zync", "3scale").unwrap();
        let labels = stored
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .labels
            .unwrap();
        assert!(!labels.contains_key(OBSOLETE_METERING_LABELS[0]));
    }

    #[tokio::test]
    async fn message_bus_settings_are_removed() {
        let client = InMemoryClusterClient::new();
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();
        let sidekiq = platform.generate_system_sidekiq_deployment().unwrap();
        let mut vars = sidekiq
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
            .env
            .clone()
            .unwrap();
        vars.push(env("MESSAGE_BUS_REDIS_URL", "redis://system-redis:6379/8"));
        client.insert(&with_env(sidekiq, vars));
        let mut secret = platform.generate_redis_secret(RedisFlavor::System);
        secret
            .string_data
            .get_or_insert_with(BTreeMap::new)
            .insert(
                "MESSAGE_BUS_URL".to_owned(),
                "redis://system-redis:6379/8".to_owned(),
            );
        client.insert(&secret);

        assert!(!ApiManagerUpgrade::new(&logic).run().await.unwrap());

        let stored = client
            .fetch::<Deployment>(SYSTEM_SIDEKIQ, "3scale")
            .unwrap();
        assert!(!env_names(&stored)
            .iter()
            .any(|var| var.starts_with("MESSAGE_BUS_REDIS_URL")));
        let stored = client
            .fetch::<Secret>(SYSTEM_REDIS_SECRET, "3scale")
            .unwrap();
        assert!(!stored.string_data.unwrap().contains_key("MESSAGE_BUS_URL"));
    }

    #[tokio::test]
    async fn mysql_config_gains_the_authentication_plugin_once() {
        let client = InMemoryClusterClient::new();
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();
        client.insert(&ConfigMap {
            metadata: ObjectMeta {
                name: Some(MYSQL_EXTRA_CONFIG_MAP.to_owned()),
                namespace: Some("3scale".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        });

        ApiManagerUpgrade::new(&logic).run().await.unwrap();
        ApiManagerUpgrade::new(&logic).run().await.unwrap();

        let stored = client
            .fetch::<ConfigMap>(MYSQL_EXTRA_CONFIG_MAP, "3scale")
            .unwrap();
        assert_eq!(
            stored.data.unwrap()[MYSQL_AUTHENTICATION_PLUGIN_KEY],
            MYSQL_AUTHENTICATION_PLUGIN_CONFIG
        );
        assert_eq!(client.writes(), 1);
    }

    #[tokio::test]
    async fn failing_updates_name_the_step() {
        let client = InMemoryClusterClient::new();
        client.fail_on::<ConfigMap>(Verb::Update, 500);
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();
        client.insert(&ConfigMap {
            metadata: ObjectMeta {
                name: Some(MYSQL_EXTRA_CONFIG_MAP.to_owned()),
                namespace: Some("3scale".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        });

        let error = ApiManagerUpgrade::new(&logic).run().await.unwrap_err();

        assert!(error
            .to_string()
            .starts_with("MySQL authentication plugin: "));
    }
}
