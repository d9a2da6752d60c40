//! Per-node pipeline tasks for Start and Stop.

use super::context::{OpCtx, log_task_error, task_start};
use crate::cluster::NodeStatus;
use crate::machine::MachineControl;
use crate::net::NetworkAttacher;
use crate::node::bootstrap_node;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::time::{Duration, Instant};

pub(crate) const REMOVE_ATTEMPTS: u32 = 5;
pub(crate) const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(500);

// ============================================================================
// LAUNCH
// ============================================================================

/// Node Launcher followed by the Bootstrap Runner for one node.
pub(crate) struct LaunchNodeTask {
    node: String,
    task_name: String,
}

impl LaunchNodeTask {
    pub fn new(node: impl Into<String>) -> Self {
        let node = node.into();
        Self {
            task_name: format!("launch {}", node),
            node,
        }
    }
}

#[async_trait]
impl PipelineTask<OpCtx> for LaunchNodeTask {
    async fn run(self: Box<Self>, ctx: OpCtx) -> SpawnletResult<()> {
        let cluster = task_start(&ctx, &self.task_name, &self.node).await;

        let (launcher, machines, settings, layout, record) = {
            let mut ctx = ctx.lock().await;
            ctx.update_node(&self.node, |n| n.status = NodeStatus::Starting)?;
            let record = ctx
                .cluster
                .state
                .nodes
                .iter()
                .find(|n| n.name == self.node)
                .cloned()
                .ok_or_else(|| SpawnletError::Internal(format!("unknown node {}", self.node)))?;
            (
                ctx.launcher.clone(),
                ctx.machines.clone(),
                ctx.cluster.settings.clone(),
                ctx.cluster.layout.clone(),
                record,
            )
        };

        let result = async {
            let machine = launcher.start(&settings, &layout, &record).await?;
            bootstrap_node(machines.as_ref(), &self.node).await?;
            Ok::<_, SpawnletError>(machine)
        }
        .await;

        let mut ctx = ctx.lock().await;
        match result {
            Ok(machine) => {
                ctx.update_node(&self.node, |n| {
                    n.status = NodeStatus::Running;
                    n.address = machine.address.clone();
                })?;
                tracing::info!(cluster = %cluster, node = %self.node, address = ?machine.address, "Node started");
                Ok(())
            }
            Err(e) => {
                log_task_error(&cluster, &self.node, &self.task_name, &e);
                ctx.update_node(&self.node, |n| n.status = NodeStatus::Failed)?;
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        &self.task_name
    }
}

// ============================================================================
// CONTROL PLANE
// ============================================================================

pub(crate) struct InitMasterTask {
    node: String,
    task_name: String,
}

impl InitMasterTask {
    pub fn new(node: impl Into<String>) -> Self {
        let node = node.into();
        Self {
            task_name: format!("init master {}", node),
            node,
        }
    }
}

#[async_trait]
impl PipelineTask<OpCtx> for InitMasterTask {
    async fn run(self: Box<Self>, ctx: OpCtx) -> SpawnletResult<()> {
        let cluster = task_start(&ctx, &self.task_name, &self.node).await;

        // Nothing else runs during this stage; hold the context throughout.
        let mut ctx = ctx.lock().await;
        let joiner = ctx.joiner.clone();
        let result = joiner.init_master(&mut ctx.cluster, &self.node).await;
        ctx.cluster.save()?;

        result.inspect_err(|e| log_task_error(&cluster, &self.node, &self.task_name, e))
    }

    fn name(&self) -> &str {
        &self.task_name
    }
}

pub(crate) struct JoinWorkerTask {
    node: String,
    task_name: String,
}

impl JoinWorkerTask {
    pub fn new(node: impl Into<String>) -> Self {
        let node = node.into();
        Self {
            task_name: format!("join {}", node),
            node,
        }
    }
}

#[async_trait]
impl PipelineTask<OpCtx> for JoinWorkerTask {
    async fn run(self: Box<Self>, ctx: OpCtx) -> SpawnletResult<()> {
        let cluster = task_start(&ctx, &self.task_name, &self.node).await;

        // Token and master address are read-only while workers join.
        let (joiner, master_ip, token) = {
            let ctx = ctx.lock().await;
            (
                ctx.joiner.clone(),
                ctx.cluster.state.master_ip.clone().unwrap_or_default(),
                ctx.cluster.state.token.clone().unwrap_or_default(),
            )
        };

        joiner
            .join_worker(&master_ip, &token, &self.node)
            .await
            .inspect_err(|e| log_task_error(&cluster, &self.node, &self.task_name, e))?;
        tracing::info!(cluster = %cluster, node = %self.node, master = %master_ip, "Worker joined");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.task_name
    }
}

// ============================================================================
// STOP
// ============================================================================

/// Shut down one node, remove its image and release its namespace.
pub(crate) struct StopNodeTask {
    node: String,
    task_name: String,
}

impl StopNodeTask {
    pub fn new(node: impl Into<String>) -> Self {
        let node = node.into();
        Self {
            task_name: format!("stop {}", node),
            node,
        }
    }
}

#[async_trait]
impl PipelineTask<OpCtx> for StopNodeTask {
    async fn run(self: Box<Self>, ctx: OpCtx) -> SpawnletResult<()> {
        let cluster = task_start(&ctx, &self.task_name, &self.node).await;

        let (machines, attacher, force, timeout, interval) = {
            let ctx = ctx.lock().await;
            (
                ctx.machines.clone(),
                NetworkAttacher::new(&ctx.cluster.settings.cni_plugin_dir),
                ctx.force,
                ctx.cluster.settings.shutdown_timeout(),
                ctx.cluster.settings.poll.interval(),
            )
        };

        let result = async {
            shutdown(machines.as_ref(), &self.node, force, timeout, interval).await?;
            remove_image(machines.as_ref(), &self.node).await?;
            attacher.release(&self.node)
        }
        .await;

        let mut ctx = ctx.lock().await;
        match result {
            Ok(()) => {
                ctx.update_node(&self.node, |n| {
                    n.status = NodeStatus::Stopped;
                    n.address = None;
                })?;
                tracing::info!(cluster = %cluster, node = %self.node, "Node stopped");
                Ok(())
            }
            Err(e) => {
                log_task_error(&cluster, &self.node, &self.task_name, &e);
                ctx.update_node(&self.node, |n| n.status = NodeStatus::Failed)?;
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        &self.task_name
    }
}

/// Power off, wait up to `timeout`, then terminate if `force` is set.
///
/// With `force`, a failing poweroff goes straight to terminate.
pub(crate) async fn shutdown(
    machines: &dyn MachineControl,
    node: &str,
    force: bool,
    timeout: Duration,
    interval: Duration,
) -> SpawnletResult<()> {
    match machines.poweroff(node).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) if force => {
            tracing::warn!(node = %node, "Poweroff failed, terminating: {}", e);
            return terminate(machines, node).await;
        }
        Err(e) => return Err(e),
    }

    if wait_stopped(machines, node, timeout, interval).await? {
        return Ok(());
    }

    if !force {
        return Err(SpawnletError::Timeout(format!(
            "node {} did not power off within {:?}",
            node, timeout
        )));
    }

    tracing::warn!(node = %node, "Poweroff timed out, terminating");
    terminate(machines, node).await
}

/// Kill `node`; a machine that is already gone counts as terminated.
pub(crate) async fn terminate(machines: &dyn MachineControl, node: &str) -> SpawnletResult<()> {
    match machines.terminate(node).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

async fn wait_stopped(
    machines: &dyn MachineControl,
    node: &str,
    timeout: Duration,
    interval: Duration,
) -> SpawnletResult<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let running = machines.list_machines().await?.iter().any(|m| m.name == node);
        if !running {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Remove the node image, retrying while it is still busy.
pub(crate) async fn remove_image(machines: &dyn MachineControl, node: &str) -> SpawnletResult<()> {
    let mut attempt = 1;
    loop {
        match machines.remove_image(node).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) if attempt < REMOVE_ATTEMPTS => {
                tracing::debug!(node = %node, attempt, "Image removal failed, retrying: {}", e);
                attempt += 1;
                tokio::time::sleep(REMOVE_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}
