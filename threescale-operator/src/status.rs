use chrono::Utc;
use kube::runtime::events::EventType;
use log::{info, warn};
use serde::Serialize;
use threescale_operator_core::{
    error::{ErrorKind, ReconcileError},
    helpers::object_info,
    kubernetes::{client::ClusterClient, ManagedResource},
    reconcilers::Retry,
    resources::crd::status::{
        ReadinessCondition, REASON_ERROR, REASON_INVALID_SPEC, REASON_ORPHAN, REASON_READY,
    },
};

use crate::{
    context::ReconcilerContext,
    events::{
        REASON_INVALID_SPEC as EVENT_INVALID_SPEC, REASON_ORPHAN as EVENT_ORPHAN,
        REASON_RECONCILE_ERROR,
    },
};

/// A resource reporting its readiness through a condition in its status.
pub trait StatusReporting: ManagedResource {
    type Status: Serialize + Send + Sync;
    /// values discovered during the reconciliation, e.g. remote ids
    type Artifacts: Send;

    fn condition(&self) -> Option<&ReadinessCondition>;

    fn next_status(
        &self,
        condition: ReadinessCondition,
        artifacts: Self::Artifacts,
    ) -> Self::Status;
}

/// Outcome of a reconciliation as it is reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub ready: bool,
    pub reason: &'static str,
    pub event: Option<(EventType, &'static str)>,
    /// `None` when the error is handed to the error policy
    pub retry: Option<Retry>,
}

pub fn classify(primary: Option<&ReconcileError>) -> Classification {
    let kind = match primary {
        Some(error) => error.kind(),
        None => {
            return Classification {
                ready: true,
                reason: REASON_READY,
                event: None,
                retry: Some(Retry::Never),
            }
        }
    };

    match kind {
        ErrorKind::InvalidSpec => Classification {
            ready: false,
            reason: REASON_INVALID_SPEC,
            event: Some((EventType::Warning, EVENT_INVALID_SPEC)),
            retry: Some(Retry::Never),
        },
        ErrorKind::Orphan => Classification {
            ready: false,
            reason: REASON_ORPHAN,
            event: Some((EventType::Normal, EVENT_ORPHAN)),
            retry: Some(Retry::Immediately),
        },
        ErrorKind::Structural | ErrorKind::Infra | ErrorKind::Other => Classification {
            ready: false,
            reason: REASON_ERROR,
            event: Some((EventType::Warning, REASON_RECONCILE_ERROR)),
            retry: None,
        },
    }
}

/// Writes the status computed from the reconciliation outcome and turns the
/// outcome into a retry decision. The status is written even when the
/// reconciliation failed, a failed write takes precedence over the primary
/// error.
pub async fn reconcile_status<C, K>(
    context: &ReconcilerContext<C>,
    resource: &K,
    artifacts: K::Artifacts,
    primary: Option<ReconcileError>,
) -> Result<Retry, ReconcileError>
where
    C: ClusterClient,
    K: StatusReporting,
{
    let classification = classify(primary.as_ref());
    let message = primary
        .as_ref()
        .map(|error| error.to_string())
        .unwrap_or_default();
    let condition = ReadinessCondition::next(
        resource.condition(),
        classification.ready,
        classification.reason,
        message.clone(),
        Utc::now(),
    );
    let status = resource.next_status(condition, artifacts);

    if let Err(source) = context.client.update_status(resource, &status).await {
        return Err(ReconcileError::StatusWrite {
            primary: primary.map(|error| error.to_string()),
            source,
        });
    }

    if let Some((type_, reason)) = classification.event {
        context
            .events
            .publish(&resource.object_ref(&()), type_, reason, message.clone())
            .await;
    }

    match (classification.retry, primary) {
        (Some(retry), None) => Ok(retry),
        (Some(retry), Some(_)) => {
            info!("{} is not ready: {message}", object_info(resource));
            Ok(retry)
        }
        (None, Some(error)) => {
            warn!("Couldn't reconcile {}: {message}", object_info(resource));
            Err(error)
        }
        (None, None) => Ok(Retry::Never),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kube::core::ObjectMeta;
    use threescale_operator_core::{
        error::FieldError,
        kubernetes::{
            client::ClientError,
            memory::{InMemoryClusterClient, Verb},
        },
        resources::{
            crd::v1alpha1::api_manager::{APIManager, APIManagerSpec},
            operator::OperatorRelease,
        },
    };

    use crate::{
        events::testing::RecordingEventPublisher,
        portal::testing::{FakeConnector, FakePortal},
    };

    use super::*;

    fn api_manager() -> APIManager {
        APIManager {
            metadata: ObjectMeta {
                name: Some("platform".to_owned()),
                namespace: Some("3scale".to_owned()),
                generation: Some(3),
                ..Default::default()
            },
            spec: APIManagerSpec {
                wildcard_domain: "apps.example.com".to_owned(),
                ..Default::default()
            },
            status: None,
        }
    }

    fn context() -> (ReconcilerContext<InMemoryClusterClient>, Arc<RecordingEventPublisher>) {
        let events = Arc::new(RecordingEventPublisher::default());
        let client = InMemoryClusterClient::new();
        client.insert(&api_manager());

        let context = ReconcilerContext::new(
            client,
            events.clone(),
            Arc::new(FakeConnector(Arc::new(FakePortal::default()))),
            OperatorRelease::default(),
        );

        (context, events)
    }

    fn stored_condition(context: &ReconcilerContext<InMemoryClusterClient>) -> ReadinessCondition {
        context
            .client
            .fetch::<APIManager>("platform", "3scale")
            .and_then(|api_manager| api_manager.status)
            .and_then(|status| status.condition)
            .unwrap()
    }

    fn orphan() -> ReconcileError {
        ReconcileError::Orphan(vec![FieldError::invalid(
            "spec.developerAccountRef",
            "acme",
            "parent account resource not found",
        )])
    }

    #[tokio::test]
    async fn success_marks_the_resource_ready_without_events() {
        let (context, events) = context();

        let retry = reconcile_status(&context, &api_manager(), (), None)
            .await
            .unwrap();

        assert_eq!(retry, Retry::Never);
        assert!(stored_condition(&context).ready);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn invalid_spec_is_not_retried() {
        let (context, events) = context();
        let error = ReconcileError::InvalidSpec(vec![FieldError::required(
            "spec.wildcardDomain",
            "wildcard domain must not be empty",
        )]);

        let retry = reconcile_status(&context, &api_manager(), (), Some(error))
            .await
            .unwrap();

        assert_eq!(retry, Retry::Never);
        assert_eq!(stored_condition(&context).reason, REASON_INVALID_SPEC);
        assert_eq!(events.events()[0].type_, EventType::Warning);
    }

    #[tokio::test]
    async fn orphans_are_retried_immediately() {
        let (context, events) = context();

        let retry = reconcile_status(&context, &api_manager(), (), Some(orphan()))
            .await
            .unwrap();

        assert_eq!(retry, Retry::Immediately);
        assert_eq!(stored_condition(&context).reason, REASON_ORPHAN);
        assert_eq!(events.events()[0].type_, EventType::Normal);
    }

    #[tokio::test]
    async fn other_errors_are_returned_after_the_status_write() {
        let (context, _) = context();
        let error = ReconcileError::from(ClientError::DeadlineExceeded);

        let error = reconcile_status(&context, &api_manager(), (), Some(error))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Infra);
        assert!(!stored_condition(&context).ready);
        assert_eq!(stored_condition(&context).reason, REASON_ERROR);
    }

    #[tokio::test]
    async fn failed_status_writes_take_precedence() {
        let (context, events) = context();
        context
            .client
            .fail_on::<APIManager>(Verb::UpdateStatus, 500);

        let error = reconcile_status(&context, &api_manager(), (), Some(orphan()))
            .await
            .unwrap_err();

        assert!(matches!(error, ReconcileError::StatusWrite { primary: Some(_), .. }));
        assert!(error
            .to_string()
            .contains("parent account resource not found"));
        assert!(events.events().is_empty());
    }
}
