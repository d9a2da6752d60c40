//! Cluster model: settings, on-disk layout and persisted state.
//!
//! Follows the config/state split: `ClusterSettings` is validated once and never
//! changes afterwards, while `ClusterState` (token, master address, nodes) is
//! updated by the orchestrator and written to `<dir>/cluster.json` after every
//! transition.

mod layout;
mod name;
mod options;
mod settings;
mod state;

pub use layout::ClusterLayout;
pub use name::{generate_node_name, is_node_of, validate_cluster_name};
pub use options::SpawnletOptions;
pub use settings::{BindSpec, ClusterSettings, ContainerRuntime, PollPolicy, RuntimePaths};
pub use state::{
    Cluster, ClusterState, ClusterStatus, ClusterSummary, ControlPlanePhase, NodeRecord, NodeRole,
    NodeStatus,
};
