use k8s_openapi::api::{
    apps::v1::{Deployment, DeploymentSpec},
    core::v1::{Container, PodSpec},
};
use log::debug;

use crate::{
    error::ReconcileError,
    helpers::{cmp_resources, find_env_var, merge_string_map, object_info},
    reconcilers::Mutator,
    resources::{
        labels::OBSOLETE_METERING_LABELS,
        triggers::{find_image_change_trigger, read_image_triggers, write_image_triggers},
    },
};

static SINGLE_CONTAINER_RESOURCES: ContainerResourcesMutator =
    ContainerResourcesMutator { containers: 1 };

static METERING_LABELS: PodTemplateLabelsMutator = PodTemplateLabelsMutator {
    obsolete: &OBSOLETE_METERING_LABELS,
};

/// Replicas, resources, affinity and tolerations of a single container
/// deployment.
pub fn generic_deployment_mutators() -> Vec<&'static dyn Mutator<Deployment>> {
    let mutators: [&'static dyn Mutator<Deployment>; 4] = [
        &deployment_replicas_mutator,
        &SINGLE_CONTAINER_RESOURCES,
        &deployment_affinity_mutator,
        &deployment_tolerations_mutator,
    ];

    mutators.to_vec()
}

/// Like [`generic_deployment_mutators`] but leaves the replica count alone.
pub fn generic_backend_mutators() -> Vec<&'static dyn Mutator<Deployment>> {
    let mutators: [&'static dyn Mutator<Deployment>; 3] = [
        &SINGLE_CONTAINER_RESOURCES,
        &deployment_affinity_mutator,
        &deployment_tolerations_mutator,
    ];

    mutators.to_vec()
}

/// Merges the current metering labels and drops the obsolete ones.
pub fn metering_labels_mutator() -> &'static dyn Mutator<Deployment> {
    &METERING_LABELS
}

fn desired_spec(desired: &Deployment) -> Result<&DeploymentSpec, ReconcileError> {
    desired
        .spec
        .as_ref()
        .ok_or_else(|| ReconcileError::structural(object_info(desired), "spec is required"))
}

fn desired_pod_spec(desired: &Deployment) -> Result<&PodSpec, ReconcileError> {
    desired_spec(desired)?
        .template
        .spec
        .as_ref()
        .ok_or_else(|| {
            ReconcileError::structural(object_info(desired), "spec.template.spec is required")
        })
}

fn existing_pod_spec(existing: &mut Deployment) -> &mut PodSpec {
    existing
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default)
}

fn single_desired_container(desired: &Deployment) -> Result<&Container, ReconcileError> {
    match desired_pod_spec(desired)?.containers.as_slice() {
        [container] => Ok(container),
        containers => Err(ReconcileError::structural(
            object_info(desired),
            format!(
                "spec.template.spec.containers length is {}, should be 1",
                containers.len()
            ),
        )),
    }
}

pub fn deployment_replicas_mutator(
    desired: &Deployment,
    existing: &mut Deployment,
) -> Result<bool, ReconcileError> {
    let desired_replicas = desired_spec(desired)?.replicas;
    let existing_spec = existing.spec.get_or_insert_with(Default::default);

    if existing_spec.replicas == desired_replicas {
        return Ok(false);
    }

    debug!(
        "{} spec.replicas changed from {:?} to {:?}",
        object_info(desired),
        existing_spec.replicas,
        desired_replicas
    );
    existing_spec.replicas = desired_replicas;

    Ok(true)
}

pub fn deployment_affinity_mutator(
    desired: &Deployment,
    existing: &mut Deployment,
) -> Result<bool, ReconcileError> {
    let desired_affinity = &desired_pod_spec(desired)?.affinity;
    let existing_pod = existing_pod_spec(existing);

    if existing_pod.affinity == *desired_affinity {
        return Ok(false);
    }

    debug!(
        "{} spec.template.spec.affinity changed",
        object_info(desired)
    );
    existing_pod.affinity = desired_affinity.to_owned();

    Ok(true)
}

pub fn deployment_tolerations_mutator(
    desired: &Deployment,
    existing: &mut Deployment,
) -> Result<bool, ReconcileError> {
    let normalize = |tolerations: &Option<Vec<_>>| match tolerations {
        Some(tolerations) if tolerations.is_empty() => None,
        other => other.to_owned(),
    };
    let desired_tolerations = normalize(&desired_pod_spec(desired)?.tolerations);
    let existing_pod = existing_pod_spec(existing);

    if normalize(&existing_pod.tolerations) == desired_tolerations {
        return Ok(false);
    }

    debug!(
        "{} spec.template.spec.tolerations changed",
        object_info(desired)
    );
    existing_pod.tolerations = desired_tolerations;

    Ok(true)
}

/// Keeps the container count at `containers` and every container's
/// resource requirements at the desired quantities.
#[derive(Debug, Clone, Copy)]
pub struct ContainerResourcesMutator {
    pub containers: usize,
}

impl Mutator<Deployment> for ContainerResourcesMutator {
    fn mutate(
        &self,
        desired: &Deployment,
        existing: &mut Deployment,
    ) -> Result<bool, ReconcileError> {
        let desired_containers = &desired_pod_spec(desired)?.containers;
        if desired_containers.len() != self.containers {
            return Err(ReconcileError::structural(
                object_info(desired),
                format!(
                    "spec.template.spec.containers length is {}, should be {}",
                    desired_containers.len(),
                    self.containers
                ),
            ));
        }

        let existing_pod = existing_pod_spec(existing);
        let mut changed = false;

        if existing_pod.containers.len() != self.containers {
            debug!(
                "{} spec.template.spec.containers length changed to {}, replacing the containers",
                object_info(desired),
                existing_pod.containers.len()
            );
            existing_pod.containers = desired_containers.to_owned();
            changed = true;
        }

        for (index, (existing_container, desired_container)) in existing_pod
            .containers
            .iter_mut()
            .zip(desired_containers)
            .enumerate()
        {
            if !cmp_resources(
                existing_container.resources.as_ref(),
                desired_container.resources.as_ref(),
            ) {
                debug!(
                    "{} spec.template.spec.containers[{index}].resources changed",
                    object_info(desired)
                );
                existing_container.resources = desired_container.resources.to_owned();
                changed = true;
            }
        }

        Ok(changed)
    }
}

/// Adds, updates or removes the env var `name` of the only container so it
/// matches the desired container.
#[derive(Debug, Clone)]
pub struct EnvVarMutator {
    pub name: String,
}

impl EnvVarMutator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Mutator<Deployment> for EnvVarMutator {
    fn mutate(
        &self,
        desired: &Deployment,
        existing: &mut Deployment,
    ) -> Result<bool, ReconcileError> {
        let desired_env = single_desired_container(desired)?
            .env
            .as_deref()
            .unwrap_or_default();
        let existing_container = existing_pod_spec(existing)
            .containers
            .first_mut()
            .ok_or_else(|| ReconcileError::InvalidObjectData(object_info(desired).into()))?;
        let existing_env = existing_container.env.get_or_insert_with(Vec::new);

        let desired_index = find_env_var(desired_env, &self.name);
        let existing_index = find_env_var(existing_env, &self.name);

        let changed = match (desired_index, existing_index) {
            (None, Some(existing_index)) => {
                existing_env.remove(existing_index);
                true
            }
            (Some(desired_index), None) => {
                existing_env.push(desired_env[desired_index].to_owned());
                true
            }
            (Some(desired_index), Some(existing_index)) => {
                if existing_env[existing_index] != desired_env[desired_index] {
                    existing_env[existing_index] = desired_env[desired_index].to_owned();
                    true
                } else {
                    false
                }
            }
            (None, None) => false,
        };

        if changed {
            debug!("{} env var {} changed", object_info(desired), self.name);
        }

        Ok(changed)
    }
}

/// Points the single image change trigger at the desired image stream tag.
pub fn deployment_image_trigger_mutator(
    desired: &Deployment,
    existing: &mut Deployment,
) -> Result<bool, ReconcileError> {
    let desired_triggers = read_image_triggers(desired)
        .map_err(|error| ReconcileError::structural(object_info(desired), error.to_string()))?;
    let desired_index = find_image_change_trigger(&desired_triggers)
        .map_err(|error| ReconcileError::structural(object_info(desired), error.to_string()))?;
    let desired_name = &desired_triggers[desired_index].from.name;

    let invalid_existing = || ReconcileError::InvalidObjectData(object_info(desired).into());
    let mut existing_triggers = read_image_triggers(existing).map_err(|_| invalid_existing())?;
    let existing_index =
        find_image_change_trigger(&existing_triggers).map_err(|_| invalid_existing())?;
    let existing_trigger = &mut existing_triggers[existing_index];

    if existing_trigger.from.name == *desired_name {
        return Ok(false);
    }

    debug!(
        "{} image change trigger moved from {} to {}",
        object_info(desired),
        existing_trigger.from.name,
        desired_name
    );
    existing_trigger.from.name = desired_name.to_owned();
    write_image_triggers(existing, &existing_triggers).map_err(|_| invalid_existing())?;

    Ok(true)
}

/// Merges the desired pod template labels and removes the `obsolete` keys.
#[derive(Debug, Clone, Copy)]
pub struct PodTemplateLabelsMutator {
    pub obsolete: &'static [&'static str],
}

impl Mutator<Deployment> for PodTemplateLabelsMutator {
    fn mutate(
        &self,
        desired: &Deployment,
        existing: &mut Deployment,
    ) -> Result<bool, ReconcileError> {
        let desired_labels = desired_spec(desired)?
            .template
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.labels.as_ref());
        let existing_labels = &mut existing
            .spec
            .get_or_insert_with(Default::default)
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .labels;

        let mut changed = merge_string_map(existing_labels, desired_labels);

        if let Some(labels) = existing_labels.as_mut() {
            for key in self.obsolete {
                changed = labels.remove(*key).is_some() || changed;
            }
        }

        if changed {
            debug!("{} pod template labels changed", object_info(desired));
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{EnvVar, PodTemplateSpec, Toleration};
    use kube::core::ObjectMeta;

    use crate::{error::ErrorKind, resources::triggers::ImageTrigger};

    use super::*;

    fn deployment(containers: Vec<Container>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("system-app".to_owned()),
                namespace: Some("3scale".to_owned()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers,
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn named(name: &str) -> Container {
        Container {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    fn with_env(vars: &[(&str, &str)]) -> Deployment {
        deployment(vec![Container {
            env: Some(
                vars.iter()
                    .map(|(name, value)| EnvVar {
                        name: name.to_string(),
                        value: Some(value.to_string()),
                        value_from: None,
                    })
                    .collect(),
            ),
            ..named("system-sidekiq")
        }])
    }

    fn with_trigger(stream_tag: &str) -> Deployment {
        let mut deployment = deployment(vec![named("zync")]);
        let trigger = ImageTrigger::image_change(stream_tag, "zync");
        write_image_triggers(&mut deployment, &[trigger]).unwrap();
        deployment
    }

    #[test]
    fn differing_container_count_replaces_existing_containers() {
        let desired = deployment(vec![
            named("system-master"),
            named("system-provider"),
            named("system-developer"),
        ]);
        let mut existing = deployment(vec![named("system-master")]);

        let changed = ContainerResourcesMutator { containers: 3 }
            .mutate(&desired, &mut existing)
            .unwrap();

        assert!(changed);
        let pod = existing.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers.len(), 3);
    }

    #[test]
    fn desired_container_count_is_a_structural_invariant() {
        let desired = deployment(vec![named("a"), named("b")]);
        let mut existing = desired.clone();

        let error = SINGLE_CONTAINER_RESOURCES
            .mutate(&desired, &mut existing)
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Structural);
    }

    #[test]
    fn env_var_is_added_updated_and_removed() {
        let mutator = EnvVarMutator::new("RAILS_ENV");
        let mut existing = with_env(&[("OTHER", "1")]);

        assert!(mutator
            .mutate(&with_env(&[("RAILS_ENV", "production")]), &mut existing)
            .unwrap());
        assert!(mutator
            .mutate(&with_env(&[("RAILS_ENV", "test")]), &mut existing)
            .unwrap());
        assert!(!mutator
            .mutate(&with_env(&[("RAILS_ENV", "test")]), &mut existing)
            .unwrap());
        assert!(mutator.mutate(&with_env(&[]), &mut existing).unwrap());

        let pod = existing.spec.unwrap().template.spec.unwrap();
        let env = pod.containers[0].env.clone().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].name, "OTHER");
    }

    #[test]
    fn image_trigger_follows_the_desired_tag() {
        let mut existing = with_trigger("amp-zync:2.8");

        let desired = with_trigger("amp-zync:2.9");
        assert!(deployment_image_trigger_mutator(&desired, &mut existing).unwrap());
        assert!(!deployment_image_trigger_mutator(&desired, &mut existing).unwrap());

        let triggers = read_image_triggers(&existing).unwrap();
        assert_eq!(triggers[0].from.name, "amp-zync:2.9");
    }

    #[test]
    fn desired_without_image_trigger_is_structural() {
        let desired = deployment(vec![named("zync")]);
        let mut existing = with_trigger("amp-zync:2.8");

        let error = deployment_image_trigger_mutator(&desired, &mut existing).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Structural);
    }

    #[test]
    fn obsolete_template_labels_are_dropped() {
        let mut desired = deployment(vec![named("zync")]);
        desired.spec.as_mut().unwrap().template.metadata = Some(ObjectMeta {
            labels: Some(BTreeMap::from([("rht.prod_ver".to_owned(), "2.9".to_owned())])),
            ..Default::default()
        });
        let mut existing = deployment(vec![named("zync")]);
        existing.spec.as_mut().unwrap().template.metadata = Some(ObjectMeta {
            labels: Some(BTreeMap::from([
                ("com.redhat.product-name".to_owned(), "3scale".to_owned()),
                ("deployment".to_owned(), "zync".to_owned()),
            ])),
            ..Default::default()
        });

        assert!(METERING_LABELS.mutate(&desired, &mut existing).unwrap());
        assert!(!METERING_LABELS.mutate(&desired, &mut existing).unwrap());

        let template = existing.spec.unwrap().template;
        let labels = template.metadata.unwrap().labels.unwrap();
        assert_eq!(
            labels.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["deployment", "rht.prod_ver"]
        );
    }

    #[test]
    fn empty_tolerations_equal_missing_ones() {
        let desired = deployment(vec![named("zync")]);
        let mut existing = deployment(vec![named("zync")]);
        existing_pod_spec(&mut existing).tolerations = Some(vec![]);

        assert!(!deployment_tolerations_mutator(&desired, &mut existing).unwrap());

        existing_pod_spec(&mut existing).tolerations = Some(vec![Toleration::default()]);
        assert!(deployment_tolerations_mutator(&desired, &mut existing).unwrap());
    }
}
