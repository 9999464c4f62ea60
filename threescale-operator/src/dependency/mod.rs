use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use threescale_operator_core::{
    error::ReconcileError,
    helpers::RequireMetadata,
    kubernetes::{client::ClusterClient, ManagedResource},
    reconcilers::{reconcile_resource, Mutator, ReconcileOutcome, Retry},
    resources::{
        crd::v1alpha1::api_manager::APIManager, platform::PlatformRelease,
        ResourceGenerationError,
    },
};

pub mod images;
pub mod redis;
pub mod system;

pub use images::ImagesReconciler;
pub use redis::RedisReconciler;
pub use system::SystemReconciler;

/// Converges one family of objects the platform depends on, in a fixed
/// order, stopping at the first failure.
#[async_trait]
pub trait DependencyReconciler: Send + Sync {
    async fn reconcile(&self) -> Result<Retry, ReconcileError>;
}

/// Convergence of objects owned by an `APIManager`.
pub struct APIManagerLogic<'a, C> {
    client: &'a C,
    api_manager: &'a APIManager,
    platform: &'a PlatformRelease,
    owner: OwnerReference,
}

impl<'a, C: ClusterClient> APIManagerLogic<'a, C> {
    pub fn new(
        client: &'a C,
        api_manager: &'a APIManager,
        platform: &'a PlatformRelease,
    ) -> Result<Self, ReconcileError> {
        api_manager.require_name_or(ResourceGenerationError::DependentMissingMetadataName)?;
        api_manager
            .require_namespace_or(ResourceGenerationError::DependentMissingMetadataNamespace)?;
        let owner = api_manager
            .controller_owner_ref(&())
            .ok_or(ResourceGenerationError::MissingData("metadata.uid".into()))?;

        Ok(Self {
            client,
            api_manager,
            platform,
            owner,
        })
    }

    pub fn client(&self) -> &'a C {
        self.client
    }

    pub fn api_manager(&self) -> &'a APIManager {
        self.api_manager
    }

    pub fn platform(&self) -> &'a PlatformRelease {
        self.platform
    }

    /// Places `desired` in the platform namespace, makes the platform
    /// resource its controller and converges it.
    pub async fn converge<K: ManagedResource>(
        &self,
        mut desired: K,
        mutators: &[&dyn Mutator<K>],
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let metadata = desired.meta_mut();
        metadata.namespace = Some(self.platform.namespace.to_owned());
        metadata.owner_references = Some(vec![self.owner.to_owned()]);

        reconcile_resource(self.client, &desired, mutators).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use kube::core::ObjectMeta;
    use threescale_operator_core::{
        kubernetes::memory::InMemoryClusterClient,
        resources::{
            crd::v1alpha1::api_manager::APIManagerSpec, operator::OperatorRelease,
            platform::PlatformReleaseBuilder,
        },
    };

    use super::*;

    pub fn api_manager(spec: serde_json::Value) -> APIManager {
        let mut spec_value = serde_json::json!({ "wildcardDomain": "apps.example.com" });
        if let (Some(base), Some(extra)) = (spec_value.as_object_mut(), spec.as_object()) {
            base.extend(extra.clone());
        }

        APIManager {
            metadata: ObjectMeta {
                name: Some("platform".to_owned()),
                namespace: Some("3scale".to_owned()),
                uid: Some("6b1c6c8e-7a8e-4c57-9c8a-0e7d2a1f0a11".to_owned()),
                generation: Some(1),
                ..Default::default()
            },
            spec: serde_json::from_value::<APIManagerSpec>(spec_value).unwrap(),
            status: None,
        }
    }

    pub fn platform(api_manager: &APIManager) -> PlatformRelease {
        PlatformReleaseBuilder::default()
            .with_operator(&OperatorRelease::default())
            .with_api_manager(api_manager)
            .build()
            .unwrap()
    }

    #[test]
    fn owner_must_carry_an_uid() {
        let client = InMemoryClusterClient::new();
        let mut api_manager = api_manager(serde_json::json!({}));
        api_manager.metadata.uid = None;
        let platform = platform(&api_manager);

        assert!(APIManagerLogic::new(&client, &api_manager, &platform).is_err());
    }
}
