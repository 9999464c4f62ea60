use std::future::Future;

use async_trait::async_trait;
use kube::{
    api::{Patch, PatchParams, PostParams},
    Api, Client,
};
use log::debug;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    helpers::{pretty_type_name, RequireMetadata},
    FIELD_MANAGER,
};

use super::ManagedResource;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Kubernetes API call failed! Reason: {}", .0)]
    Kube(kube::Error),
    #[error("The call was cancelled!")]
    Cancelled,
    #[error("The reconciliation deadline has passed!")]
    DeadlineExceeded,
    #[error("Object is missing metadata!")]
    MissingObjectMetadata,
    #[error("Couldn't (de)serialize the object! Reason: {}", .0)]
    Serialization(serde_json::Error),
}

#[cfg(test)]
impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Kube(kube::Error::Api(response)) if response.code == 404)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Kube(kube::Error::Api(response)) if response.code == 409)
    }
}

/// Typed get / create / update access to namespaced cluster objects.
///
/// Watches and lists belong to the scheduler, the reconcilers only ever read
/// and write single objects.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get<K: ManagedResource>(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<K>, ClientError>;

    async fn create<K: ManagedResource>(&self, object: &K) -> Result<K, ClientError>;

    async fn update<K: ManagedResource>(&self, object: &K) -> Result<K, ClientError>;

    async fn update_status<K, S>(&self, object: &K, status: &S) -> Result<(), ClientError>
    where
        K: ManagedResource,
        S: Serialize + Send + Sync;
}

/// [`ClusterClient`] backed by the API server. Every call is abandoned as
/// soon as the operator-wide cancellation token fires.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    cancellation: CancellationToken,
}

impl KubeClusterClient {
    pub fn new(client: Client, cancellation: CancellationToken) -> Self {
        Self {
            client,
            cancellation,
        }
    }

    fn api<K: ManagedResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn guarded<T>(
        &self,
        call: impl Future<Output = Result<T, kube::Error>> + Send,
    ) -> Result<T, ClientError> {
        cancellable(&self.cancellation, call).await
    }
}

/// Races an API call against the cancellation token, a fired token wins.
async fn cancellable<T>(
    cancellation: &CancellationToken,
    call: impl Future<Output = Result<T, kube::Error>>,
) -> Result<T, ClientError> {
    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(ClientError::Cancelled),
        result = call => result.map_err(ClientError::Kube),
    }
}

fn post_params() -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(FIELD_MANAGER.to_owned()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get<K: ManagedResource>(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<K>, ClientError> {
        debug!(
            "Fetching '{name}' {} in '{namespace}'...",
            pretty_type_name::<K>()
        );

        self.guarded(self.api::<K>(namespace).get_opt(name)).await
    }

    async fn create<K: ManagedResource>(&self, object: &K) -> Result<K, ClientError> {
        let namespace = object.require_namespace_or(ClientError::MissingObjectMetadata)?;

        self.guarded(self.api::<K>(namespace).create(&post_params(), object))
            .await
    }

    async fn update<K: ManagedResource>(&self, object: &K) -> Result<K, ClientError> {
        let name = object.require_name_or(ClientError::MissingObjectMetadata)?;
        let namespace = object.require_namespace_or(ClientError::MissingObjectMetadata)?;

        let api = self.api::<K>(namespace);
        let params = post_params();
        let call = api.replace(name, &params, object);
        self.guarded(call).await
    }

    async fn update_status<K, S>(&self, object: &K, status: &S) -> Result<(), ClientError>
    where
        K: ManagedResource,
        S: Serialize + Send + Sync,
    {
        let name = object.require_name_or(ClientError::MissingObjectMetadata)?;
        let namespace = object.require_namespace_or(ClientError::MissingObjectMetadata)?;
        let patch = json!({ "status": status });

        self.guarded(self.api::<K>(namespace).patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        ))
        .await?;

        Ok(())
    }
}
