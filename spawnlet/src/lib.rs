//! spawnlet: short-lived multi-node Kubernetes clusters on systemd-nspawn.
//!
//! ## Architecture
//!
//! ```text
//! ClusterOrchestrator (create / start / stop / destroy / list)
//!   ├── fs            base layer, binary copies, overlay triples
//!   ├── node          NodeLauncher (clone, spawn, wait) + bootstrap
//!   │     └── spawnlet-shim: net (netns + CNI bridge) then systemd-nspawn
//!   ├── controlplane  kubeadm init / token / join
//!   └── machine       machinectl boundary (typed records)
//! ```
//!
//! Per-node work runs through the `pipeline` executor: parallel stages wait
//! for every task and aggregate failures, sequential stages stop at the
//! first error.

pub mod cluster;
pub mod controlplane;
pub mod fs;
pub mod logging;
pub mod machine;
pub mod net;
pub mod node;
pub mod orchestrator;
pub mod pipeline;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{
    Cluster, ClusterSettings, ClusterStatus, ClusterSummary, ContainerRuntime, SpawnletOptions,
};
pub use logging::{init_logging, init_stderr_logging};
pub use orchestrator::ClusterOrchestrator;
pub use spawnlet_shared::{SpawnletError, SpawnletResult};
