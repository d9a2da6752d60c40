//! Persisted cluster state.
//!
//! A `Cluster` is the explicit object every orchestrator operation receives;
//! there is no process-wide token or address. It is written to
//! `<dir>/cluster.json` after each transition so that a later CLI invocation
//! sees the same token, master address and node names.

use super::{ClusterLayout, ClusterSettings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Worker,
}

impl NodeRole {
    /// Role is positional: index 0 is the master.
    pub fn for_index(index: usize) -> Self {
        if index == 0 { Self::Master } else { Self::Worker }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Worker => f.write_str("worker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Name assigned, image not yet cloned.
    Pending,
    /// Image cloned, unit spawned, waiting for the machine to come up.
    Starting,
    Running,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub role: NodeRole,
    pub index: usize,
    pub status: NodeStatus,
    /// Only trustworthy once `status` is `Running`.
    #[serde(default)]
    pub address: Option<String>,
}

impl NodeRecord {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            role: NodeRole::for_index(index),
            index,
            status: NodeStatus::Pending,
            address: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == NodeStatus::Running
    }

    /// Anything short of a completed stop may still own a machine, an image
    /// or a network namespace. Failed nodes included.
    pub fn holds_resources(&self) -> bool {
        self.status != NodeStatus::Stopped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Created,
    Starting,
    PartiallyRunning,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::PartiallyRunning => "partially-running",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Control-plane bootstrap progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPlanePhase {
    #[default]
    Uninitialized,
    MasterInitialized,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub status: ClusterStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub master_ip: Option<String>,
    #[serde(default)]
    pub phase: ControlPlanePhase,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self {
            status: ClusterStatus::Created,
            created_at: Utc::now(),
            token: None,
            master_ip: None,
            phase: ControlPlanePhase::Uninitialized,
            nodes: Vec::new(),
        }
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new()
    }
}

/// Row of `spawnlet list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub status: ClusterStatus,
    pub kubernetes_version: String,
    pub nodes: usize,
    pub running: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct ClusterFile {
    settings: ClusterSettings,
    state: ClusterState,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub settings: ClusterSettings,
    pub layout: ClusterLayout,
    pub state: ClusterState,
}

impl Cluster {
    pub fn new(settings: ClusterSettings, layout: ClusterLayout) -> Self {
        Self {
            settings,
            layout,
            state: ClusterState::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Load `<dir>/cluster.json`.
    pub fn load(layout: ClusterLayout) -> SpawnletResult<Self> {
        let path = layout.state_path();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SpawnletError::NotFound(format!(
                    "cluster state {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let file: ClusterFile = serde_json::from_str(&raw)?;
        Ok(Self {
            settings: file.settings,
            layout,
            state: file.state,
        })
    }

    /// Write state atomically (temp file + rename).
    pub fn save(&self) -> SpawnletResult<()> {
        let path = self.layout.state_path();
        let tmp = path.with_extension("json.tmp");
        let file = ClusterFile {
            settings: self.settings.clone(),
            state: self.state.clone(),
        };
        std::fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Nodes recorded as running. Makes no external call.
    pub fn running_machines(&self) -> usize {
        self.state.nodes.iter().filter(|n| n.is_running()).count()
    }

    /// Recorded nodes that still have to go through Stop.
    pub fn live_nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.state.nodes.iter().filter(|n| n.holds_resources())
    }

    pub fn master(&self) -> Option<&NodeRecord> {
        self.state.nodes.iter().find(|n| n.role == NodeRole::Master)
    }

    pub fn workers(&self) -> impl Iterator<Item = &NodeRecord> {
        self.state.nodes.iter().filter(|n| n.role == NodeRole::Worker)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut NodeRecord> {
        self.state.nodes.iter_mut().find(|n| n.name == name)
    }

    /// Forget the bootstrap token and master address; the next start
    /// regenerates both.
    pub fn clear_token(&mut self) {
        self.state.token = None;
        self.state.master_ip = None;
        self.state.phase = ControlPlanePhase::Uninitialized;
    }

    /// Derive the cluster status from node records.
    pub fn refresh_status(&mut self) {
        let total = self.state.nodes.len();
        let running = self.running_machines();
        self.state.status = match (total, running) {
            (0, _) => ClusterStatus::Stopped,
            (_, 0) => ClusterStatus::Stopped,
            (t, r) if t == r => ClusterStatus::Running,
            _ => ClusterStatus::PartiallyRunning,
        };
    }

    pub fn summary(&self) -> ClusterSummary {
        ClusterSummary {
            name: self.settings.name.clone(),
            status: self.state.status,
            kubernetes_version: self.settings.kubernetes_version.clone(),
            nodes: self.state.nodes.len(),
            running: self.running_machines(),
            created_at: self.state.created_at,
        }
    }
}
