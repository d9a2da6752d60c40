//! Shared context of one orchestrator operation.

use crate::cluster::Cluster;
use crate::controlplane::ControlPlaneJoiner;
use crate::machine::MachineControl;
use crate::node::NodeLauncher;
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) struct OperationContext {
    pub cluster: Cluster,
    pub machines: Arc<dyn MachineControl>,
    pub launcher: NodeLauncher,
    pub joiner: ControlPlaneJoiner,
    /// Stop only: fall back to terminate when poweroff does not finish in time.
    pub force: bool,
}

pub(crate) type OpCtx = Arc<Mutex<OperationContext>>;

impl OperationContext {
    /// Apply `update` to the record of `node` and persist the cluster.
    pub fn update_node(
        &mut self,
        node: &str,
        update: impl FnOnce(&mut crate::cluster::NodeRecord),
    ) -> SpawnletResult<()> {
        let record = self.cluster.node_mut(node).ok_or_else(|| {
            SpawnletError::Internal(format!("node {} is not part of the cluster", node))
        })?;
        update(record);
        self.cluster.save()
    }
}

pub(crate) async fn task_start(ctx: &OpCtx, task_name: &str, node: &str) -> String {
    let ctx = ctx.lock().await;
    let cluster = ctx.cluster.name().to_string();
    tracing::debug!(cluster = %cluster, node = %node, task = %task_name, "Task started");
    cluster
}

pub(crate) fn log_task_error(cluster: &str, node: &str, task_name: &str, error: &SpawnletError) {
    tracing::error!(cluster = %cluster, node = %node, task = %task_name, "Task failed: {}", error);
}
