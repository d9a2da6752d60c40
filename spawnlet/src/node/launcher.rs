//! Node Launcher: clone, compose, spawn and wait for one node.

use super::spawner::{NodeSpawnSpec, NodeSpawner};
use crate::cluster::{ClusterLayout, ClusterSettings, NodeRecord, PollPolicy};
use crate::fs::overlay_specs_for;
use crate::machine::{MachineControl, MachineRecord};
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeLauncher {
    machines: Arc<dyn MachineControl>,
    spawner: Arc<dyn NodeSpawner>,
    poll: PollPolicy,
}

impl NodeLauncher {
    pub fn new(
        machines: Arc<dyn MachineControl>,
        spawner: Arc<dyn NodeSpawner>,
        poll: PollPolicy,
    ) -> Self {
        Self {
            machines,
            spawner,
            poll,
        }
    }

    /// Bring `node` up and return its machine record once it is running.
    pub async fn start(
        &self,
        settings: &ClusterSettings,
        layout: &ClusterLayout,
        node: &NodeRecord,
    ) -> SpawnletResult<MachineRecord> {
        if !node.is_running() {
            self.machines
                .clone_image(&settings.base_image, &node.name)
                .await?;
            tracing::debug!(node = %node.name, base = %settings.base_image, "Cloned node image");
        }

        let spec = self.spawn_spec(settings, layout, &node.name)?;
        self.spawner.spawn(&spec).await?;

        let record = self.wait_running(&node.name).await?;
        tracing::info!(node = %node.name, address = ?record.address, "Node is running");
        Ok(record)
    }

    /// Overlay arguments and bind mounts for `node`; creates its upper dirs.
    pub fn spawn_spec(
        &self,
        settings: &ClusterSettings,
        layout: &ClusterLayout,
        node: &str,
    ) -> SpawnletResult<NodeSpawnSpec> {
        let mut overlays = Vec::new();
        for spec in overlay_specs_for(layout, node) {
            std::fs::create_dir_all(&spec.upper).map_err(|e| {
                SpawnletError::Storage(format!(
                    "failed to create {}: {}",
                    spec.upper.display(),
                    e
                ))
            })?;
            overlays.push(spec.to_nspawn_arg()?);
        }

        Ok(NodeSpawnSpec {
            machine: node.to_string(),
            overlays,
            binds: settings.binds.clone(),
            cni_plugin_dir: settings.cni_plugin_dir.clone(),
        })
    }

    /// Poll `list` until `node` shows up, at most `poll.attempts` times.
    pub async fn wait_running(&self, node: &str) -> SpawnletResult<MachineRecord> {
        for attempt in 1..=self.poll.attempts {
            if let Some(record) = self
                .machines
                .list_machines()
                .await?
                .into_iter()
                .find(|m| m.name == node)
            {
                return Ok(record);
            }
            tracing::trace!(node = %node, attempt, "Node not running yet");
            if attempt < self.poll.attempts {
                tokio::time::sleep(self.poll.interval()).await;
            }
        }

        Err(SpawnletError::Timeout(format!(
            "timeout waiting for node {} to start ({} attempts, {} ms apart)",
            node, self.poll.attempts, self.poll.interval_ms
        )))
    }
}
