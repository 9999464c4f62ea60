use std::{any::type_name, collections::BTreeMap};

use k8s_openapi::{
    api::core::v1::{EnvVar, ResourceRequirements},
    apimachinery::pkg::api::resource::Quantity,
};
use kube::Resource;

pub fn pretty_type_name<'a, T>() -> &'a str {
    type_name::<T>().split("::").last().unwrap_or("Resource")
}

/// `Kind namespace/name` of an object, used in log lines and error details.
pub fn object_info<K: Resource<DynamicType = ()>>(object: &K) -> String {
    let meta = object.meta();

    format!(
        "{} {}/{}",
        K::kind(&()),
        meta.namespace.as_deref().unwrap_or("---"),
        meta.name.as_deref().unwrap_or("---")
    )
}

pub trait RequireMetadata<E> {
    fn require_name_or(&self, error: E) -> Result<&str, E>;
    fn require_namespace_or(&self, error: E) -> Result<&str, E>;
    fn require_name_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E>;
    fn require_namespace_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E>;
}

impl<T: Resource, E> RequireMetadata<E> for T {
    fn require_name_or(&self, error: E) -> Result<&str, E> {
        Ok(self.meta().name.as_ref().ok_or(error)?.as_str())
    }

    fn require_namespace_or(&self, error: E) -> Result<&str, E> {
        Ok(self.meta().namespace.as_ref().ok_or(error)?.as_str())
    }

    fn require_name_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E> {
        Ok(self.meta().name.as_ref().ok_or_else(error)?.as_str())
    }

    fn require_namespace_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E> {
        Ok(self.meta().namespace.as_ref().ok_or_else(error)?.as_str())
    }
}

pub fn find_env_var(env: &[EnvVar], name: &str) -> Option<usize> {
    env.iter().position(|var| var.name == name)
}

/// Merges `desired` into `existing`, overwriting differing values and
/// keeping keys only present in `existing`. Returns whether anything changed.
pub fn merge_string_map(
    existing: &mut Option<BTreeMap<String, String>>,
    desired: Option<&BTreeMap<String, String>>,
) -> bool {
    let desired = match desired {
        Some(desired) if !desired.is_empty() => desired,
        _ => return false,
    };

    let existing = existing.get_or_insert_with(BTreeMap::new);
    let mut changed = false;

    for (key, value) in desired {
        if existing.get(key) != Some(value) {
            existing.insert(key.to_owned(), value.to_owned());
            changed = true;
        }
    }

    changed
}

/// Compares resource requirements by quantity semantics, so `1000m` and `1`
/// CPU as well as `1Gi` and `1024Mi` memory are treated as equal.
pub fn cmp_resources(
    left: Option<&ResourceRequirements>,
    right: Option<&ResourceRequirements>,
) -> bool {
    let empty = ResourceRequirements::default();
    let left = left.unwrap_or(&empty);
    let right = right.unwrap_or(&empty);

    cmp_quantity_maps(left.limits.as_ref(), right.limits.as_ref())
        && cmp_quantity_maps(left.requests.as_ref(), right.requests.as_ref())
}

fn cmp_quantity_maps(
    left: Option<&BTreeMap<String, Quantity>>,
    right: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let left = left.unwrap_or(&empty);
    let right = right.unwrap_or(&empty);

    left.len() == right.len()
        && left.iter().all(|(key, value)| match right.get(key) {
            Some(other) => match (parse_quantity(&value.0), parse_quantity(&other.0)) {
                (Some(l), Some(r)) => (l - r).abs() <= 1e-9 * l.abs().max(r.abs()).max(1.0),
                _ => value.0 == other.0,
            },
            None => false,
        })
}

/// Parses a Kubernetes quantity string into its base-unit value. Binary
/// (`Ki`..`Ei`), decimal (`n`..`E`) and exponent (`1e3`, `5E-2`) forms are
/// understood.
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 2f64.powi(10),
        "Mi" => 2f64.powi(20),
        "Gi" => 2f64.powi(30),
        "Ti" => 2f64.powi(40),
        "Pi" => 2f64.powi(50),
        "Ei" => 2f64.powi(60),
        exponent => {
            let exponent = exponent
                .strip_prefix('e')
                .or_else(|| exponent.strip_prefix('E'))?;
            10f64.powi(exponent.parse().ok()?)
        }
    };

    Some(number * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(cpu: &str, memory: &str) -> ResourceRequirements {
        ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_owned(), Quantity(cpu.to_owned())),
                ("memory".to_owned(), Quantity(memory.to_owned())),
            ])),
            ..Default::default()
        }
    }

    #[test]
    fn quantities_compare_semantically() {
        assert!(cmp_resources(
            Some(&requirements("1", "1Gi")),
            Some(&requirements("1000m", "1024Mi"))
        ));
        assert!(!cmp_resources(
            Some(&requirements("100m", "1Gi")),
            Some(&requirements("200m", "1Gi"))
        ));
    }

    #[test]
    fn large_and_exponent_quantities_compare_semantically() {
        assert_eq!(parse_quantity("1e3"), Some(1000.0));
        assert!((parse_quantity("5E-1").unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(parse_quantity("2P"), Some(2e15));
        assert_eq!(parse_quantity("1Ei"), Some(2f64.powi(60)));
        assert_eq!(parse_quantity("1Zi"), None);

        assert!(cmp_resources(
            Some(&requirements("1e3", "1Pi")),
            Some(&requirements("1k", "1024Ti"))
        ));
        assert!(cmp_resources(
            Some(&requirements("2", "1E")),
            Some(&requirements("2000m", "1e18"))
        ));
    }

    #[test]
    fn missing_requirements_equal_empty_ones() {
        assert!(cmp_resources(None, Some(&ResourceRequirements::default())));
        assert!(!cmp_resources(None, Some(&requirements("1", "1Gi"))));
    }

    #[test]
    fn merge_reports_changes_only_when_values_differ() {
        let desired = BTreeMap::from([("a".to_owned(), "1".to_owned())]);
        let mut existing = Some(BTreeMap::from([
            ("a".to_owned(), "1".to_owned()),
            ("b".to_owned(), "2".to_owned()),
        ]));

        assert!(!merge_string_map(&mut existing, Some(&desired)));

        let desired = BTreeMap::from([("a".to_owned(), "3".to_owned())]);
        assert!(merge_string_map(&mut existing, Some(&desired)));
        assert_eq!(existing.unwrap().get("a").map(String::as_str), Some("3"));
    }
}
