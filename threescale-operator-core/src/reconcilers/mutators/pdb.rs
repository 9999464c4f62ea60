use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use log::debug;

use crate::{error::ReconcileError, helpers::object_info};

pub fn pod_disruption_budget_mutator(
    desired: &PodDisruptionBudget,
    existing: &mut PodDisruptionBudget,
) -> Result<bool, ReconcileError> {
    let desired_spec = desired.spec.as_ref().ok_or_else(|| {
        ReconcileError::structural(object_info(desired), "spec is required")
    })?;
    let existing_spec = existing.spec.get_or_insert_with(Default::default);
    let mut changed = false;

    if existing_spec.selector != desired_spec.selector {
        existing_spec.selector = desired_spec.selector.to_owned();
        changed = true;
    }

    if existing_spec.min_available != desired_spec.min_available {
        existing_spec.min_available = desired_spec.min_available.to_owned();
        changed = true;
    }

    if existing_spec.max_unavailable != desired_spec.max_unavailable {
        existing_spec.max_unavailable = desired_spec.max_unavailable.to_owned();
        changed = true;
    }

    if changed {
        debug!("{} disruption budget changed", object_info(desired));
    }

    Ok(changed)
}
