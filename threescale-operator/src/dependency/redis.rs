use async_trait::async_trait;
use threescale_operator_core::{
    error::ReconcileError,
    kubernetes::client::ClusterClient,
    reconcilers::{
        mutators::{
            create_only_mutator, defaults_only_secret_mutator, generic_backend_mutators,
            image_stream_mutator,
        },
        Retry,
    },
    resources::platform::redis::RedisFlavor,
};

use super::{APIManagerLogic, DependencyReconciler};

/// One of the two internal redis instances.
pub struct RedisReconciler<'a, C> {
    logic: &'a APIManagerLogic<'a, C>,
    flavor: RedisFlavor,
}

impl<'a, C> RedisReconciler<'a, C> {
    pub fn new(logic: &'a APIManagerLogic<'a, C>, flavor: RedisFlavor) -> Self {
        Self { logic, flavor }
    }
}

#[async_trait]
impl<'a, C: ClusterClient> DependencyReconciler for RedisReconciler<'a, C> {
    async fn reconcile(&self) -> Result<Retry, ReconcileError> {
        let logic = self.logic;
        let platform = logic.platform();

        logic
            .converge(
                platform.generate_redis_deployment(self.flavor)?,
                &generic_backend_mutators(),
            )
            .await?;
        logic
            .converge(
                platform.generate_redis_service(self.flavor),
                &[create_only_mutator()],
            )
            .await?;

        logic
            .converge(
                platform.generate_redis_config_map(self.flavor),
                &[create_only_mutator()],
            )
            .await?;

        logic
            .converge(
                platform.generate_redis_claim(self.flavor),
                &[create_only_mutator()],
            )
            .await?;
        logic
            .converge(
                platform.generate_redis_image_stream(self.flavor),
                &[&image_stream_mutator],
            )
            .await?;
        logic
            .converge(
                platform.generate_redis_secret(self.flavor),
                &[&defaults_only_secret_mutator],
            )
            .await?;

        Ok(Retry::Never)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::{
        api::{
            apps::v1::Deployment,
            core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service},
        },
        ByteString,
    };
    use threescale_operator_core::{
        kubernetes::memory::{InMemoryClusterClient, Verb},
        resources::{
            crd::openshift::ImageStream,
            platform::redis::{REDIS_CONFIG_MAP, SYSTEM_REDIS},
        },
    };

    use crate::dependency::tests::{api_manager, platform};

    use super::*;

    #[tokio::test]
    async fn creates_every_object_of_the_instance() {
        let client = InMemoryClusterClient::new();
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();

        let retry = RedisReconciler::new(&logic, RedisFlavor::System)
            .reconcile()
            .await
            .unwrap();

        assert_eq!(retry, Retry::Never);
        assert!(client.fetch::<Deployment>(SYSTEM_REDIS, "3scale").is_some());
        assert!(client.fetch::<Service>(SYSTEM_REDIS, "3scale").is_some());
        assert!(client
            .fetch::<ConfigMap>(REDIS_CONFIG_MAP, "3scale")
            .is_some());
        assert!(client
            .fetch::<PersistentVolumeClaim>("system-redis-storage", "3scale")
            .is_some());
        assert!(client
            .fetch::<ImageStream>(SYSTEM_REDIS, "3scale")
            .is_some());
        assert!(client.fetch::<Secret>(SYSTEM_REDIS, "3scale").is_some());
    }

    #[tokio::test]
    async fn backend_instance_mounts_the_shared_config() {
        let client = InMemoryClusterClient::new();
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();

        RedisReconciler::new(&logic, RedisFlavor::Backend)
            .reconcile()
            .await
            .unwrap();

        let config = client
            .fetch::<ConfigMap>(REDIS_CONFIG_MAP, "3scale")
            .unwrap();
        assert!(config.data.unwrap().contains_key("redis.conf"));
    }

    #[tokio::test]
    async fn stored_connection_settings_are_kept() {
        let client = InMemoryClusterClient::new();
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();
        let mut secret = platform.generate_redis_secret(RedisFlavor::System);
        secret.string_data = None;
        secret.data = Some(BTreeMap::from([(
            "URL".to_owned(),
            ByteString(b"redis://elsewhere:6379/1".to_vec()),
        )]));
        client.insert(&secret);

        RedisReconciler::new(&logic, RedisFlavor::System)
            .reconcile()
            .await
            .unwrap();

        let stored = client.fetch::<Secret>(SYSTEM_REDIS, "3scale").unwrap();
        let data = stored.data.unwrap();
        assert_eq!(data["URL"].0, b"redis://elsewhere:6379/1".to_vec());
        assert!(data.contains_key("SENTINEL_HOSTS"));
    }

    #[tokio::test]
    async fn stops_at_the_first_failure() {
        let client = InMemoryClusterClient::new();
        client.fail_on::<Service>(Verb::Create, 500);
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();

        let result = RedisReconciler::new(&logic, RedisFlavor::Backend)
            .reconcile()
            .await;

        assert!(result.is_err());
        assert!(client
            .fetch::<Deployment>("backend-redis", "3scale")
            .is_some());
        assert!(client.fetch::<Secret>("backend-redis", "3scale").is_none());
    }
}
