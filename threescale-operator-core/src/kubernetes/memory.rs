use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use kube::error::ErrorResponse;
use serde::Serialize;
use serde_json::Value;

use crate::helpers::RequireMetadata;

use super::{
    client::{ClientError, ClusterClient},
    ManagedResource, ObjectKey,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Update,
    UpdateStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCall {
    pub verb: Verb,
    pub key: ObjectKey,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    verb: Verb,
    kind: String,
    code: u16,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    calls: Vec<ClusterCall>,
    failures: Vec<InjectedFailure>,
    resource_version: u64,
}

/// A cluster kept in memory. Objects are stored in their serialized form so
/// every read hands out a fresh copy, just like the API server would.
#[derive(Debug, Default)]
pub struct InMemoryClusterClient {
    state: Mutex<State>,
}

fn api_error(code: u16, reason: &str, message: String) -> ClientError {
    ClientError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message,
        reason: reason.to_owned(),
        code,
    }))
}

impl InMemoryClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seeds an object without recording a call.
    pub fn insert<K: ManagedResource>(&self, object: &K) {
        let name = object.require_name_or(()).unwrap_or_default();
        let namespace = object.require_namespace_or(()).unwrap_or_default();
        let key = ObjectKey::of::<K>(name, namespace);
        let value = serde_json::to_value(object).unwrap_or(Value::Null);

        self.lock().objects.insert(key, value);
    }

    /// Reads an object without recording a call.
    pub fn fetch<K: ManagedResource>(&self, name: &str, namespace: &str) -> Option<K> {
        let state = self.lock();
        let value = state.objects.get(&ObjectKey::of::<K>(name, namespace))?;

        serde_json::from_value(value.clone()).ok()
    }

    pub fn remove<K: ManagedResource>(&self, name: &str, namespace: &str) {
        self.lock()
            .objects
            .remove(&ObjectKey::of::<K>(name, namespace));
    }

    /// Makes every subsequent `verb` call on objects of kind `K` fail with
    /// the given HTTP status code.
    pub fn fail_on<K: ManagedResource>(&self, verb: Verb, code: u16) {
        self.lock().failures.push(InjectedFailure {
            verb,
            kind: K::kind(&()).into_owned(),
            code,
        });
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.lock().calls.clone()
    }

    /// Number of create and update calls recorded so far.
    pub fn writes(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call.verb, Verb::Create | Verb::Update))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn record(&self, verb: Verb, key: &ObjectKey) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(ClusterCall {
            verb,
            key: key.clone(),
        });

        match state
            .failures
            .iter()
            .find(|failure| failure.verb == verb && failure.kind == key.kind)
        {
            Some(failure) => Err(api_error(
                failure.code,
                "InternalError",
                format!("injected failure for {key}"),
            )),
            None => Ok(()),
        }
    }

    fn key_of<K: ManagedResource>(object: &K) -> Result<ObjectKey, ClientError> {
        let name = object.require_name_or(ClientError::MissingObjectMetadata)?;
        let namespace = object.require_namespace_or(ClientError::MissingObjectMetadata)?;

        Ok(ObjectKey::of::<K>(name, namespace))
    }

    fn store<K: ManagedResource>(&self, key: ObjectKey, object: &K) -> Result<K, ClientError> {
        let mut value = serde_json::to_value(object).map_err(ClientError::Serialization)?;
        let mut state = self.lock();
        state.resource_version += 1;

        if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert(
                "resourceVersion".to_owned(),
                Value::String(state.resource_version.to_string()),
            );
        }

        state.objects.insert(key, value.clone());

        serde_json::from_value(value).map_err(ClientError::Serialization)
    }
}

#[async_trait]
impl ClusterClient for InMemoryClusterClient {
    async fn get<K: ManagedResource>(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<K>, ClientError> {
        let key = ObjectKey::of::<K>(name, namespace);
        self.record(Verb::Get, &key)?;

        let value = self.lock().objects.get(&key).cloned();

        value
            .map(serde_json::from_value)
            .transpose()
            .map_err(ClientError::Serialization)
    }

    async fn create<K: ManagedResource>(&self, object: &K) -> Result<K, ClientError> {
        let key = Self::key_of(object)?;
        self.record(Verb::Create, &key)?;

        if self.lock().objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{key} already exists")));
        }

        self.store(key, object)
    }

    async fn update<K: ManagedResource>(&self, object: &K) -> Result<K, ClientError> {
        let key = Self::key_of(object)?;
        self.record(Verb::Update, &key)?;

        if !self.lock().objects.contains_key(&key) {
            return Err(api_error(404, "NotFound", format!("{key} not found")));
        }

        self.store(key, object)
    }

    async fn update_status<K, S>(&self, object: &K, status: &S) -> Result<(), ClientError>
    where
        K: ManagedResource,
        S: Serialize + Send + Sync,
    {
        let key = Self::key_of(object)?;
        self.record(Verb::UpdateStatus, &key)?;

        let status = serde_json::to_value(status).map_err(ClientError::Serialization)?;
        let mut state = self.lock();
        let stored = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{key} not found")))?;

        if let Some(stored) = stored.as_object_mut() {
            stored.insert("status".to_owned(), status);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::core::ObjectMeta;

    use super::*;

    fn config_map() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("redis-config".to_owned()),
                namespace: Some("3scale".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn created_objects_can_be_fetched_back() {
        let client = InMemoryClusterClient::new();

        client.create(&config_map()).await.unwrap();
        let fetched: Option<ConfigMap> = client.get("redis-config", "3scale").await.unwrap();

        assert!(fetched.is_some());
        assert!(client
            .create(&config_map())
            .await
            .unwrap_err()
            .is_conflict());
    }

    #[tokio::test]
    async fn updates_of_missing_objects_are_not_found() {
        let client = InMemoryClusterClient::new();

        let error = client.update(&config_map()).await.unwrap_err();

        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn injected_failures_only_hit_the_given_verb_and_kind() {
        let client = InMemoryClusterClient::new();
        client.fail_on::<ConfigMap>(Verb::Update, 500);

        client.create(&config_map()).await.unwrap();
        let error = client.update(&config_map()).await.unwrap_err();

        assert!(matches!(error, ClientError::Kube(kube::Error::Api(ref r)) if r.code == 500));
        assert_eq!(client.writes(), 2);
    }
}
