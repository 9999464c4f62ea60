use k8s_openapi::{api::core::v1::Secret, ByteString};
use log::debug;

use crate::{error::ReconcileError, helpers::object_info};

/// Fills in keys of the desired secret that the stored one lacks. Values the
/// stored secret already holds are never touched, so generated passwords and
/// user supplied credentials survive every reconciliation.
pub fn defaults_only_secret_mutator(
    desired: &Secret,
    existing: &mut Secret,
) -> Result<bool, ReconcileError> {
    let desired_entries = desired
        .data
        .iter()
        .flatten()
        .map(|(key, value)| (key, value.to_owned()))
        .chain(
            desired
                .string_data
                .iter()
                .flatten()
                .map(|(key, value)| (key, ByteString(value.as_bytes().to_vec()))),
        );

    let mut changed = false;

    for (key, value) in desired_entries {
        let present = existing
            .data
            .as_ref()
            .map_or(false, |data| data.contains_key(key))
            || existing
                .string_data
                .as_ref()
                .map_or(false, |data| data.contains_key(key));

        if present {
            continue;
        }

        debug!(
            "{} is missing key {key}, adding its default",
            object_info(desired)
        );
        existing
            .data
            .get_or_insert_with(Default::default)
            .insert(key.to_owned(), value);
        changed = true;
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use kube::core::ObjectMeta;

    use super::*;

    fn secret(data: &[(&str, &str)], string_data: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("system-seed".to_owned()),
                namespace: Some("3scale".to_owned()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(key, value)| (key.to_string(), ByteString(value.as_bytes().to_vec())))
                    .collect(),
            ),
            string_data: Some(
                string_data
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn data(secret: &Secret) -> BTreeMap<String, String> {
        secret
            .data
            .iter()
            .flatten()
            .map(|(key, value)| (key.to_owned(), String::from_utf8_lossy(&value.0).into_owned()))
            .collect()
    }

    #[test]
    fn existing_values_are_never_overwritten() {
        let desired = secret(
            &[],
            &[("MASTER_PASSWORD", "generated"), ("MASTER_USER", "master")],
        );
        let mut existing = secret(&[("MASTER_PASSWORD", "chosen-by-user")], &[]);

        assert!(defaults_only_secret_mutator(&desired, &mut existing).unwrap());

        let data = data(&existing);
        assert_eq!(data["MASTER_PASSWORD"], "chosen-by-user");
        assert_eq!(data["MASTER_USER"], "master");
    }

    #[test]
    fn keys_pending_in_string_data_count_as_present() {
        let desired = secret(&[("TOKEN", "a")], &[]);
        let mut existing = secret(&[], &[("TOKEN", "b")]);

        assert!(!defaults_only_secret_mutator(&desired, &mut existing).unwrap());
        assert!(data(&existing).is_empty());
    }

    #[test]
    fn complete_secrets_are_left_alone() {
        let desired = secret(&[], &[("URL", "redis://system-redis:6379/1")]);
        let mut existing = secret(&[("URL", "redis://external:6379/1")], &[]);

        assert!(!defaults_only_secret_mutator(&desired, &mut existing).unwrap());
    }
}
