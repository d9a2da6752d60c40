//! In-node bootstrap script.

use crate::fs::BOOTSTRAP_SCRIPT_PATH;
use crate::machine::MachineControl;
use spawnlet_shared::SpawnletResult;

/// Run the bootstrap script inside a running node.
///
/// Output is discarded on success; on failure it is part of the returned
/// `SpawnletError::Process`.
pub async fn bootstrap_node(machines: &dyn MachineControl, node: &str) -> SpawnletResult<()> {
    machines
        .shell(node, &[BOOTSTRAP_SCRIPT_PATH.to_string()])
        .await
        .map(drop)?;
    tracing::info!(node = %node, "Bootstrapped node");
    Ok(())
}
