//! Overlay triples merging the base layer with a node's private layer.

use crate::cluster::ClusterLayout;
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::path::{Path, PathBuf};

/// Root subtrees that are overlaid at node start. Independent, never nested.
pub const OVERLAY_TARGETS: [&str; 3] = ["/etc", "/opt", "/usr/bin"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySpec {
    /// Read-only subtree of the base layer.
    pub lower: PathBuf,
    /// Read-write subtree of the node's private layer.
    pub upper: PathBuf,
    /// Mount point inside the node.
    pub target: String,
}

impl OverlaySpec {
    /// `--overlay=<lower>:<upper>:<target>` for systemd-nspawn.
    pub fn to_nspawn_arg(&self) -> SpawnletResult<String> {
        let lower = path_component(&self.lower)?;
        let upper = path_component(&self.upper)?;
        Ok(format!("--overlay={}:{}:{}", lower, upper, self.target))
    }
}

/// systemd-nspawn splits overlay arguments on ':'.
fn path_component(path: &Path) -> SpawnletResult<&str> {
    let s = path
        .to_str()
        .ok_or_else(|| SpawnletError::Config(format!("non UTF-8 path {}", path.display())))?;
    if s.contains(':') {
        return Err(SpawnletError::Config(format!(
            "overlay path must not contain ':': {}",
            s
        )));
    }
    Ok(s)
}

/// Overlay triples for one node.
pub fn overlay_specs_for(layout: &ClusterLayout, node: &str) -> Vec<OverlaySpec> {
    OVERLAY_TARGETS
        .iter()
        .map(|target| OverlaySpec {
            lower: layout.base_path(target),
            upper: layout.machine_path(node, target),
            target: target.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specs_for_node() {
        let layout = ClusterLayout::new("/var/lib/spawnlet/clusters/demo");
        let specs = overlay_specs_for(&layout, "demo-worker-abc123");

        assert_eq!(specs.len(), 3);
        assert_eq!(
            specs[2].to_nspawn_arg().unwrap(),
            "--overlay=/var/lib/spawnlet/clusters/demo/rootfs-base-readonly/usr/bin:\
             /var/lib/spawnlet/clusters/demo/rootfs-machines/demo-worker-abc123/usr/bin:/usr/bin"
        );
        assert!(specs.iter().all(|s| s.lower != s.upper));
    }

    #[test]
    fn test_colon_in_path_rejected() {
        let layout = ClusterLayout::new("/tmp/a:b");
        let specs = overlay_specs_for(&layout, "n");
        assert!(specs[0].to_nspawn_arg().is_err());
    }
}
