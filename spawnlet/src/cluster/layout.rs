//! On-disk layout of one cluster directory.
//!
//! ```text
//! <dir>/
//!   cluster.json               persisted settings + state
//!   admin.kubeconfig           control-plane credentials (after init)
//!   rootfs-base-readonly/      shared lower layer for every node
//!   rootfs-machines/<node>/    per-node upper layer
//! ```

use std::path::{Path, PathBuf};

pub const BASE_ROOTFS_DIR: &str = "rootfs-base-readonly";
pub const MACHINES_ROOTFS_DIR: &str = "rootfs-machines";
pub const KUBECONFIG_FILE: &str = "admin.kubeconfig";
pub const STATE_FILE: &str = "cluster.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLayout {
    dir: PathBuf,
}

impl ClusterLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read-only base rootfs shared by all nodes.
    pub fn base_dir(&self) -> PathBuf {
        self.dir.join(BASE_ROOTFS_DIR)
    }

    pub fn machines_dir(&self) -> PathBuf {
        self.dir.join(MACHINES_ROOTFS_DIR)
    }

    /// Private read-write rootfs of one node.
    pub fn machine_dir(&self, node: &str) -> PathBuf {
        self.machines_dir().join(node)
    }

    pub fn kubeconfig_path(&self) -> PathBuf {
        self.dir.join(KUBECONFIG_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Resolve an absolute in-node path (e.g. `/etc/kubernetes/admin.conf`)
    /// against the node's private layer.
    pub fn machine_path(&self, node: &str, in_node: &str) -> PathBuf {
        self.machine_dir(node).join(in_node.trim_start_matches('/'))
    }

    /// Resolve an absolute in-node path against the base layer.
    pub fn base_path(&self, in_node: &str) -> PathBuf {
        self.base_dir().join(in_node.trim_start_matches('/'))
    }

    pub fn exists(&self) -> bool {
        self.dir.exists()
    }

    /// Remove the whole cluster directory.
    pub fn cleanup(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
