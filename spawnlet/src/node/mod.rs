//! Node Launcher and Bootstrap Runner.
//!
//! ## Architecture
//!
//! - **NodeLauncher**: clones the node image, computes overlays, spawns the
//!   node and polls until it is running
//! - **NodeSpawner**: starts the node process in the background; the real
//!   implementation runs the `spawnlet-shim` binary under `systemd-run`
//! - **bootstrap_node**: runs `/opt/bootstrap.sh` inside a running node

mod bootstrap;
mod launcher;
mod spawner;

pub use bootstrap::bootstrap_node;
pub use launcher::NodeLauncher;
pub use spawner::{NodeSpawnSpec, NodeSpawner, SHIM_BINARY, SystemdRunSpawner, UNIT_PREFIX};
