use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client,
};
use log::warn;

pub const REASON_INVALID_SPEC: &str = "InvalidSpec";
pub const REASON_ORPHAN: &str = "Orphan";
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

pub const ACTION_RECONCILE: &str = "Reconcile";

/// Publishes events on reconciled resources. Publishing is fire and forget,
/// failures are only logged.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    );
}

pub struct KubeEventPublisher {
    client: Client,
    reporter: Reporter,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_owned(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            reference.to_owned(),
        );
        let event = Event {
            type_,
            reason: reason.to_owned(),
            note: Some(note),
            action: ACTION_RECONCILE.to_owned(),
            secondary: None,
        };

        if let Err(error) = recorder.publish(event).await {
            warn!(
                "Couldn't publish '{reason}' event for {}! Reason: {error}",
                reference.name.as_deref().unwrap_or("---")
            );
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedEvent {
        pub object: String,
        pub type_: EventType,
        pub reason: String,
        pub note: String,
    }

    #[derive(Default)]
    pub struct RecordingEventPublisher {
        events: Mutex<Vec<RecordedEvent>>,
    }

    impl RecordingEventPublisher {
        pub fn events(&self) -> Vec<RecordedEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingEventPublisher {
        async fn publish(
            &self,
            reference: &ObjectReference,
            type_: EventType,
            reason: &str,
            note: String,
        ) {
            self.events.lock().unwrap().push(RecordedEvent {
                object: reference.name.clone().unwrap_or_default(),
                type_,
                reason: reason.to_owned(),
                note,
            });
        }
    }
}
