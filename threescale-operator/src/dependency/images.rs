use async_trait::async_trait;
use threescale_operator_core::{
    error::ReconcileError,
    kubernetes::client::ClusterClient,
    reconcilers::{mutators::image_stream_mutator, Retry},
};

use super::{APIManagerLogic, DependencyReconciler};

/// Image streams of the product components.
pub struct ImagesReconciler<'a, C> {
    logic: &'a APIManagerLogic<'a, C>,
}

impl<'a, C> ImagesReconciler<'a, C> {
    pub fn new(logic: &'a APIManagerLogic<'a, C>) -> Self {
        Self { logic }
    }
}

#[async_trait]
impl<'a, C: ClusterClient> DependencyReconciler for ImagesReconciler<'a, C> {
    async fn reconcile(&self) -> Result<Retry, ReconcileError> {
        for stream in self.logic.platform().generate_product_image_streams() {
            self.logic.converge(stream, &[&image_stream_mutator]).await?;
        }

        Ok(Retry::Never)
    }
}

#[cfg(test)]
mod tests {
    use threescale_operator_core::{
        kubernetes::memory::InMemoryClusterClient,
        resources::{crd::openshift::ImageStream, platform::images::ZYNC_DATABASE_STREAM},
    };

    use crate::dependency::tests::{api_manager, platform};

    use super::*;

    #[tokio::test]
    async fn external_zync_database_has_no_image_stream() {
        let client = InMemoryClusterClient::new();
        let api_manager = api_manager(serde_json::json!({
            "externalComponents": { "zync": { "database": true } }
        }));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();

        ImagesReconciler::new(&logic).reconcile().await.unwrap();

        assert_eq!(client.writes(), 5);
        assert!(client
            .fetch::<ImageStream>(ZYNC_DATABASE_STREAM, "3scale")
            .is_none());
    }

    #[tokio::test]
    async fn streams_are_owned_by_the_platform() {
        let client = InMemoryClusterClient::new();
        let api_manager = api_manager(serde_json::json!({}));
        let platform = platform(&api_manager);
        let logic = APIManagerLogic::new(&client, &api_manager, &platform).unwrap();

        ImagesReconciler::new(&logic).reconcile().await.unwrap();
        client.clear_calls();
        ImagesReconciler::new(&logic).reconcile().await.unwrap();

        let stream = client
            .fetch::<ImageStream>(ZYNC_DATABASE_STREAM, "3scale")
            .unwrap();
        let owners = stream.metadata.owner_references.unwrap();
        assert_eq!(owners[0].name, "platform");
        assert_eq!(owners[0].controller, Some(true));
        assert_eq!(client.writes(), 0);
    }
}
