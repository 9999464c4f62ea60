use log::{debug, info};

use crate::{
    error::ReconcileError,
    helpers::{object_info, RequireMetadata},
    kubernetes::{client::ClusterClient, ManagedResource},
};

pub mod mutators;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
}

/// How soon the scheduler should run the reconciliation again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// only on the next periodic resync or watch event
    Never,
    Immediately,
}

impl Retry {
    pub fn is_immediate(&self) -> bool {
        *self == Retry::Immediately
    }
}

/// Reconciles one field group of `existing` towards `desired`, returning
/// whether `existing` was changed.
pub trait Mutator<K>: Send + Sync {
    fn mutate(&self, desired: &K, existing: &mut K) -> Result<bool, ReconcileError>;
}

impl<K, F> Mutator<K> for F
where
    F: Fn(&K, &mut K) -> Result<bool, ReconcileError> + Send + Sync,
{
    fn mutate(&self, desired: &K, existing: &mut K) -> Result<bool, ReconcileError> {
        self(desired, existing)
    }
}

/// Converges a single object: creates it when missing, otherwise runs every
/// mutator over the stored copy and writes it back only if one of them
/// reported a change.
pub async fn reconcile_resource<C, K>(
    client: &C,
    desired: &K,
    mutators: &[&dyn Mutator<K>],
) -> Result<ReconcileOutcome, ReconcileError>
where
    C: ClusterClient,
    K: ManagedResource,
{
    let name = desired.require_name_or_else(|| {
        ReconcileError::structural(object_info(desired), "metadata.name is required")
    })?;
    let namespace = desired.require_namespace_or_else(|| {
        ReconcileError::structural(object_info(desired), "metadata.namespace is required")
    })?;

    let mut existing = match client.get::<K>(name, namespace).await? {
        Some(existing) => existing,
        None => {
            client.create(desired).await?;
            info!("Created {}", object_info(desired));

            return Ok(ReconcileOutcome::Created);
        }
    };

    let mut changed = false;
    for mutator in mutators {
        changed = mutator.mutate(desired, &mut existing)? || changed;
    }

    if !changed {
        debug!("{} is up to date", object_info(desired));
        return Ok(ReconcileOutcome::Unchanged);
    }

    client.update(&existing).await?;
    info!("Updated {}", object_info(desired));

    Ok(ReconcileOutcome::Updated)
}
