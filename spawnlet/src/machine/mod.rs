//! Administrative container tool boundary.
//!
//! ## Architecture
//!
//! - **MachineControl**: every operation on machines and machine images
//!   (clone, list, shell, poweroff, terminate, remove).
//! - **parse**: the only place that understands the tool's tabular text output.
//! - **Machinectl**: the real implementation, shelling out to `machinectl`.
//!
//! Nodes are started through `crate::node::NodeSpawner`, which is a separate
//! seam because starting involves a background unit and the node-start shim.

mod machinectl;
mod parse;

pub use machinectl::Machinectl;
pub use parse::{parse_images, parse_machines};

use crate::util::CommandOutput;
use async_trait::async_trait;
use spawnlet_shared::SpawnletResult;

/// One running machine as reported by `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRecord {
    pub name: String,
    pub class: String,
    pub service: String,
    /// First address of the machine, if it has one yet.
    pub address: Option<String>,
}

/// One machine image as reported by `list-images`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub name: String,
    pub kind: String,
    pub read_only: bool,
}

/// Operations on machines and machine images.
///
/// Implementations must report "No machine/image 'x' known" as
/// `SpawnletError::NotFound` so that stop and remove paths can ignore it.
#[async_trait]
pub trait MachineControl: Send + Sync {
    /// Clone image `base` into a new image `dest`.
    async fn clone_image(&self, base: &str, dest: &str) -> SpawnletResult<()>;

    /// List running machines.
    async fn list_machines(&self) -> SpawnletResult<Vec<MachineRecord>>;

    /// List machine images.
    async fn list_images(&self) -> SpawnletResult<Vec<ImageRecord>>;

    /// Run a command inside `machine` and return its captured output.
    async fn shell(&self, machine: &str, command: &[String]) -> SpawnletResult<CommandOutput>;

    /// Ask the machine to shut down cleanly.
    async fn poweroff(&self, machine: &str) -> SpawnletResult<()>;

    /// Kill the machine immediately.
    async fn terminate(&self, machine: &str) -> SpawnletResult<()>;

    /// Remove a machine image.
    async fn remove_image(&self, image: &str) -> SpawnletResult<()>;

    /// Succeeds when the image exists, `NotFound` otherwise.
    async fn show_image(&self, image: &str) -> SpawnletResult<()>;
}

/// Find a running machine by name and return its address.
pub async fn machine_address(
    machines: &dyn MachineControl,
    name: &str,
) -> SpawnletResult<Option<String>> {
    Ok(machines
        .list_machines()
        .await?
        .into_iter()
        .find(|m| m.name == name)
        .and_then(|m| m.address))
}
