use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service},
};
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Client,
};
use log::{debug, info};
use threescale_operator_core::{
    error::{FieldError, ReconcileError},
    helpers::object_info,
    kubernetes::client::{ClusterClient, KubeClusterClient},
    reconcilers::Retry,
    resources::{
        crd::{
            status::ReadinessCondition,
            v1alpha1::api_manager::{APIManager, APIManagerStatus},
        },
        platform::{redis::RedisFlavor, PlatformRelease, PlatformReleaseBuilder},
        ResourceGenerationError,
    },
};

use crate::{
    context::ReconcilerContext,
    dependency::{
        APIManagerLogic, DependencyReconciler, ImagesReconciler, RedisReconciler,
        SystemReconciler,
    },
    helpers::handle_reconciliation_result,
    status::{reconcile_status, StatusReporting},
    upgrade::ApiManagerUpgrade,
};

use super::{error_action, retry_action, watched_api, within_deadline};

impl StatusReporting for APIManager {
    type Status = APIManagerStatus;
    type Artifacts = ();

    fn condition(&self) -> Option<&ReadinessCondition> {
        self.status
            .as_ref()
            .and_then(|status| status.condition.as_ref())
    }

    fn next_status(&self, condition: ReadinessCondition, _: ()) -> APIManagerStatus {
        APIManagerStatus {
            condition: Some(condition),
            observed_generation: self.metadata.generation,
        }
    }
}

pub async fn start_api_manager_controller(
    client: Client,
    context: Arc<ReconcilerContext<KubeClusterClient>>,
) {
    info!("Creating APIManager controller...");

    let release = &context.release;
    let config = Config::default();
    let controller = Controller::new(watched_api::<APIManager>(&client, release), config.clone())
        .owns(watched_api::<Deployment>(&client, release), config.clone())
        .owns(watched_api::<Service>(&client, release), config.clone())
        .owns(watched_api::<ConfigMap>(&client, release), config.clone())
        .owns(watched_api::<Secret>(&client, release), config.clone())
        .owns(
            watched_api::<PersistentVolumeClaim>(&client, release),
            config,
        )
        .shutdown_on_signal()
        .run(
            reconcile_api_manager,
            reconcile_api_manager_error,
            context.clone(),
        )
        .for_each(handle_reconciliation_result);

    info!("APIManager controller created!");

    controller.await
}

/// Whether the platform got converged or an upgrade step asked for another
/// pass first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Converged,
    Requeue,
}

pub async fn reconcile_api_manager<C: ClusterClient + 'static>(
    object: Arc<APIManager>,
    context: Arc<ReconcilerContext<C>>,
) -> Result<Action, ReconcileError> {
    if object.metadata.deletion_timestamp.is_some() {
        debug!(
            "{} is being deleted, skipping",
            object_info(object.as_ref())
        );
        return Ok(Action::await_change());
    }

    let primary = match within_deadline(&context, try_reconcile(&object, &context)).await {
        Ok(Pass::Requeue) => return Ok(retry_action(Retry::Immediately, &context)),
        Ok(Pass::Converged) => None,
        Err(error) => Some(error),
    };

    let retry = reconcile_status(&context, object.as_ref(), (), primary).await?;

    Ok(retry_action(retry, &context))
}

pub fn reconcile_api_manager_error<C>(
    _object: Arc<APIManager>,
    error: &ReconcileError,
    _context: Arc<ReconcilerContext<C>>,
) -> Action {
    error_action(error)
}

async fn try_reconcile<C: ClusterClient>(
    object: &APIManager,
    context: &ReconcilerContext<C>,
) -> Result<Pass, ReconcileError> {
    validate(object)?;

    let platform = build_platform(object, context)?;
    let logic = APIManagerLogic::new(&context.client, object, &platform)?;

    if ApiManagerUpgrade::new(&logic).run().await? {
        info!("{} is being upgraded, requeueing", object_info(object));
        return Ok(Pass::Requeue);
    }

    let mut reconcilers: Vec<Box<dyn DependencyReconciler + '_>> =
        vec![Box::new(ImagesReconciler::new(&logic))];
    if !platform.external.backend_redis {
        reconcilers.push(Box::new(RedisReconciler::new(&logic, RedisFlavor::Backend)));
    }
    if !platform.external.system_redis {
        reconcilers.push(Box::new(RedisReconciler::new(&logic, RedisFlavor::System)));
    }
    reconcilers.push(Box::new(SystemReconciler::new(&logic)));

    for reconciler in reconcilers {
        if reconciler.reconcile().await?.is_immediate() {
            return Ok(Pass::Requeue);
        }
    }

    Ok(Pass::Converged)
}

fn validate(object: &APIManager) -> Result<(), ReconcileError> {
    match object.spec.wildcard_domain.trim().is_empty() {
        true => Err(ReconcileError::InvalidSpec(vec![FieldError::required(
            "spec.wildcardDomain",
            "wildcard domain must not be empty",
        )])),
        false => Ok(()),
    }
}

fn build_platform<C>(
    object: &APIManager,
    context: &ReconcilerContext<C>,
) -> Result<PlatformRelease, ReconcileError> {
    PlatformReleaseBuilder::default()
        .with_operator(&context.release)
        .with_api_manager(object)
        .build()
        .map_err(|error| ResourceGenerationError::MissingData(error.to_string().into()).into())
}
