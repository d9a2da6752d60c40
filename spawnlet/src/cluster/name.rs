//! Cluster and node naming rules.

use super::NodeRole;
use rand::Rng;
use rand::distr::Alphanumeric;
use spawnlet_shared::{SpawnletError, SpawnletResult};

pub const MAX_CLUSTER_NAME_LEN: usize = 50;
const NODE_SUFFIX_LEN: usize = 6;

/// Accept 1-50 ASCII alphanumerics or hyphens. Invalid names are rejected, never repaired.
pub fn validate_cluster_name(name: &str) -> SpawnletResult<()> {
    if name.is_empty() || name.len() > MAX_CLUSTER_NAME_LEN {
        return Err(SpawnletError::Config(format!(
            "cluster name must be 1-{} characters, got {}",
            MAX_CLUSTER_NAME_LEN,
            name.len()
        )));
    }

    if let Some(bad) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
        return Err(SpawnletError::Config(format!(
            "cluster name '{}' contains invalid character '{}' (allowed: a-z, A-Z, 0-9, '-')",
            name, bad
        )));
    }

    Ok(())
}

/// `<cluster>-<role>-<random suffix>`, e.g. `demo-worker-x7k2qa`.
pub fn generate_node_name(cluster: &str, role: NodeRole) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(NODE_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{}-{}", cluster, role, suffix)
}

/// Whether `machine` is named like a node of `cluster`.
pub fn is_node_of(cluster: &str, machine: &str) -> bool {
    let Some(rest) = machine
        .strip_prefix(cluster)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };
    [NodeRole::Master, NodeRole::Worker].iter().any(|role| {
        rest.strip_prefix(role.to_string().as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|suffix| {
                suffix.len() == NODE_SUFFIX_LEN
                    && suffix
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        let longest = "x".repeat(MAX_CLUSTER_NAME_LEN);
        for name in ["demo", "a", "my-cluster-2", longest.as_str(), "-", "ABC-def"] {
            assert!(validate_cluster_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        let too_long = "x".repeat(MAX_CLUSTER_NAME_LEN + 1);
        let names = [
            "",
            too_long.as_str(),
            "under_score",
            "dot.name",
            "space name",
            "slash/x",
            "ünï",
        ];
        for name in names {
            let err = validate_cluster_name(name).unwrap_err();
            assert!(matches!(err, SpawnletError::Config(_)), "{name} should be rejected");
        }
    }

    #[test]
    fn test_node_names() {
        let master = generate_node_name("demo", NodeRole::Master);
        let worker = generate_node_name("demo", NodeRole::Worker);

        assert!(master.starts_with("demo-master-"));
        assert!(worker.starts_with("demo-worker-"));
        assert_eq!(master.len(), "demo-master-".len() + NODE_SUFFIX_LEN);
        assert!(
            master
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        );
        assert_ne!(worker, generate_node_name("demo", NodeRole::Worker));
    }

    #[test]
    fn test_longest_name_fits_machine_limit() {
        let name = generate_node_name(&"x".repeat(MAX_CLUSTER_NAME_LEN), NodeRole::Worker);
        assert!(name.len() <= 64);
    }

    #[test]
    fn test_is_node_of() {
        let worker = generate_node_name("demo", NodeRole::Worker);
        assert!(is_node_of("demo", &worker));
        assert!(is_node_of("demo", "demo-master-x7k2qa"));

        assert!(!is_node_of("demo", "demo-x-master-x7k2qa"));
        assert!(!is_node_of("demo-x", "demo-master-x7k2qa"));
        assert!(!is_node_of("demo", "demo-master-short"));
        assert!(!is_node_of("demo", "demo-etcd-x7k2qa"));
        assert!(!is_node_of("demo", "flatcar"));
    }
}
