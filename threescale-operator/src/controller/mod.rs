use std::{future::Future, sync::Arc, time::Duration};

use kube::{runtime::controller::Action, Api, Client};
use threescale_operator_core::{
    error::{ErrorKind, ReconcileError},
    kubernetes::{
        client::{ClientError, KubeClusterClient},
        ManagedResource,
    },
    reconcilers::Retry,
    resources::operator::OperatorRelease,
};
use tokio::join;
use tokio_util::sync::CancellationToken;

use crate::{context::ReconcilerContext, events::KubeEventPublisher, portal::PortaConnector};

use self::{
    api_manager::start_api_manager_controller, developer_user::start_developer_user_controller,
};

pub mod api_manager;
pub mod developer_user;

pub const CONTROLLER_NAME: &str = "threescale-operator";

const DEFAULT_ERROR_REQUEUE_SECS: u64 = 10;
const VALIDATION_ERROR_REQUEUE_SECS: u64 = 60 * 5;

pub async fn main_controller(
    client: Client,
    release: OperatorRelease,
    cancellation: CancellationToken,
) {
    let context = Arc::new(ReconcilerContext::new(
        KubeClusterClient::new(client.clone(), cancellation),
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
        Arc::new(PortaConnector::default()),
        release,
    ));

    join!(
        start_api_manager_controller(client.clone(), context.clone()),
        start_developer_user_controller(client, context)
    );
}

/// Api over the watched namespace, or over all of them.
fn watched_api<K: ManagedResource>(client: &Client, release: &OperatorRelease) -> Api<K> {
    match release.watch_namespace.as_deref() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

pub fn retry_action<C>(retry: Retry, context: &ReconcilerContext<C>) -> Action {
    match retry {
        Retry::Never => Action::requeue(context.config.resync_period),
        Retry::Immediately => Action::requeue(Duration::ZERO),
    }
}

pub fn error_action(error: &ReconcileError) -> Action {
    Action::requeue(match error.kind() {
        ErrorKind::Structural => Duration::from_secs(VALIDATION_ERROR_REQUEUE_SECS),
        _ => Duration::from_secs(DEFAULT_ERROR_REQUEUE_SECS),
    })
}

/// Runs a reconciliation, giving up once the configured timeout passes.
async fn within_deadline<C, T>(
    context: &ReconcilerContext<C>,
    reconciliation: impl Future<Output = Result<T, ReconcileError>>,
) -> Result<T, ReconcileError> {
    match tokio::time::timeout(context.config.reconcile_timeout, reconciliation).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::DeadlineExceeded.into()),
    }
}
