//! Cluster Orchestrator: Create / Start / Stop / Destroy.
//!
//! ## Architecture
//!
//! Start and Stop are table-driven pipelines over per-node tasks:
//!
//! ```text
//! Start(n):
//!   1. Launch+Bootstrap x n   (parallel, failures collected, no cancellation)
//!   2. InitMaster (node 0)    (sequential)
//!   3. JoinWorker x (n - 1)   (parallel)
//!
//! Stop:
//!   1. Poweroff/Terminate + RemoveImage + ReleaseNetns per live node   (parallel)
//!   then the bootstrap token is cleared
//! ```
//!
//! A node is live until Stop has completed for it, so nodes that failed to
//! launch or bootstrap are stopped too. Start tears such leftovers down
//! before it assigns new node names.
//!
//! A stage only starts once every task of the previous stage has finished.
//! The cluster state is persisted after every node transition.

mod context;
mod tasks;

use crate::cluster::{
    Cluster, ClusterLayout, ClusterSettings, ClusterStatus, ClusterSummary, ControlPlanePhase,
    NodeRecord, NodeRole, SpawnletOptions, generate_node_name, is_node_of, validate_cluster_name,
};
use crate::controlplane::{Capabilities, ControlPlaneJoiner};
use crate::fs::{CreateGuard, copy_into_base, copy_jobs, prepare_base};
use crate::machine::{MachineControl, Machinectl};
use crate::net::NetworkAttacher;
use crate::node::{NodeLauncher, NodeSpawner, SystemdRunSpawner};
use crate::pipeline::{
    BoxedTask, ExecutionPlan, PipelineBuilder, PipelineExecutor, PipelineMetrics, Stage,
};
use context::{OpCtx, OperationContext};
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::sync::Arc;
use tasks::{
    InitMasterTask, JoinWorkerTask, LaunchNodeTask, StopNodeTask, remove_image, terminate,
};
use tokio::sync::Mutex;

// ============================================================================
// EXECUTION PLANS
// ============================================================================

fn start_plan(cluster: &Cluster) -> ExecutionPlan<OpCtx> {
    let limit = cluster.settings.max_parallel;
    let mut stages: Vec<Stage<BoxedTask<OpCtx>>> = Vec::new();

    let launches: Vec<BoxedTask<OpCtx>> = cluster
        .state
        .nodes
        .iter()
        .map(|n| Box::new(LaunchNodeTask::new(&n.name)) as BoxedTask<OpCtx>)
        .collect();
    stages.push(Stage::parallel(launches).with_limit(limit));

    if let Some(master) = cluster.master() {
        let init: BoxedTask<OpCtx> = Box::new(InitMasterTask::new(&master.name));
        stages.push(Stage::sequential(vec![init]));
    }

    let joins: Vec<BoxedTask<OpCtx>> = cluster
        .workers()
        .map(|n| Box::new(JoinWorkerTask::new(&n.name)) as BoxedTask<OpCtx>)
        .collect();
    if !joins.is_empty() {
        stages.push(Stage::parallel(joins).with_limit(limit));
    }

    ExecutionPlan::new(stages)
}

fn stop_plan(cluster: &Cluster) -> ExecutionPlan<OpCtx> {
    let stops: Vec<BoxedTask<OpCtx>> = cluster
        .live_nodes()
        .map(|n| Box::new(StopNodeTask::new(&n.name)) as BoxedTask<OpCtx>)
        .collect();
    ExecutionPlan::new(vec![
        Stage::parallel(stops).with_limit(cluster.settings.max_parallel),
    ])
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct ClusterOrchestrator {
    options: SpawnletOptions,
    machines: Arc<dyn MachineControl>,
    /// `None` resolves a `systemd-run` spawner per cluster (its shim path).
    spawner: Option<Arc<dyn NodeSpawner>>,
}

impl ClusterOrchestrator {
    /// Orchestrator driving `machinectl` and `systemd-run` on this host.
    pub fn new(options: SpawnletOptions) -> Self {
        Self {
            options,
            machines: Arc::new(Machinectl::new()),
            spawner: None,
        }
    }

    pub fn with_backends(
        options: SpawnletOptions,
        machines: Arc<dyn MachineControl>,
        spawner: Arc<dyn NodeSpawner>,
    ) -> Self {
        Self {
            options,
            machines,
            spawner: Some(spawner),
        }
    }

    pub fn options(&self) -> &SpawnletOptions {
        &self.options
    }

    /// Layout of the cluster called `name`. Validates the name first.
    pub fn layout(&self, name: &str) -> SpawnletResult<ClusterLayout> {
        validate_cluster_name(name)?;
        Ok(ClusterLayout::new(self.options.cluster_dir(name)))
    }

    pub fn load(&self, name: &str) -> SpawnletResult<Cluster> {
        Cluster::load(self.layout(name)?)
    }

    /// Validate settings, prepare the base layer and copy binaries into it.
    ///
    /// Nothing is created when validation fails, and the cluster directory is
    /// removed again when any later step fails.
    pub async fn create(&self, settings: ClusterSettings) -> SpawnletResult<Cluster> {
        settings.validate()?;
        let layout = self.layout(&settings.name)?;
        if layout.exists() {
            return Err(SpawnletError::InvalidState(format!(
                "cluster {} already exists at {}",
                settings.name,
                layout.dir().display()
            )));
        }

        let jobs = copy_jobs(&settings)?;
        match self.machines.show_image(&settings.base_image).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                return Err(SpawnletError::Config(format!(
                    "base image {} does not exist",
                    settings.base_image
                )));
            }
            Err(e) => return Err(e),
        }

        std::fs::create_dir_all(layout.dir()).map_err(|e| {
            SpawnletError::Storage(format!("failed to create {}: {}", layout.dir().display(), e))
        })?;
        let mut guard = CreateGuard::new(layout.clone());

        prepare_base(&settings, &layout)?;
        copy_into_base(&layout, jobs).await?;

        let cluster = Cluster::new(settings, layout);
        cluster.save()?;
        guard.disarm();

        tracing::info!(cluster = %cluster.name(), dir = %cluster.layout.dir().display(), "Cluster created");
        Ok(cluster)
    }

    /// Start `nodes` nodes: node 0 becomes the master, the rest join it.
    ///
    /// A no-op when exactly `nodes` nodes are already running.
    pub async fn start(&self, name: &str, nodes: usize) -> SpawnletResult<PipelineMetrics> {
        if nodes == 0 {
            return Err(SpawnletError::Config("node count must be at least 1".into()));
        }

        let mut cluster = self.load(name)?;
        let running = cluster.running_machines();
        if running == nodes {
            tracing::info!(cluster = %name, nodes, "Cluster already running");
            return Ok(PipelineMetrics::default());
        }
        if running > 0 {
            return Err(SpawnletError::InvalidState(format!(
                "cluster {} has {} node(s) running, wanted {}; stop it first",
                name, running, nodes
            )));
        }

        if cluster.live_nodes().next().is_some() {
            tracing::warn!(cluster = %name, "Stopping nodes left over from an earlier start");
            self.stop_nodes(cluster, true).await?;
            cluster = self.load(name)?;
        }

        cluster.clear_token();
        cluster.state.nodes = (0..nodes)
            .map(|index| {
                let role = NodeRole::for_index(index);
                NodeRecord::new(generate_node_name(name, role), index)
            })
            .collect();
        cluster.state.status = ClusterStatus::Starting;
        cluster.save()?;

        let plan = start_plan(&cluster);
        let ctx = self.context(cluster, false)?;
        tracing::info!(cluster = %name, nodes, "Starting cluster");

        let result =
            PipelineExecutor::execute(PipelineBuilder::from_plan("start", plan), Arc::clone(&ctx))
                .await;

        let mut ctx = ctx.lock().await;
        if result.is_ok() {
            ctx.cluster.state.phase = ControlPlanePhase::Ready;
        }
        ctx.cluster.refresh_status();
        ctx.cluster.save()?;

        match &result {
            Ok(_) => tracing::info!(cluster = %name, nodes, "Cluster is ready"),
            Err(e) => tracing::error!(cluster = %name, "Start failed: {}", e),
        }
        result
    }

    /// Stop every live node. Without `force` this is a no-op when every
    /// recorded node is already stopped; with `force`, nodes that do not
    /// power off are terminated.
    pub async fn stop(&self, name: &str, force: bool) -> SpawnletResult<PipelineMetrics> {
        let cluster = self.load(name)?;
        if cluster.live_nodes().next().is_none() && !force {
            tracing::info!(cluster = %name, "No nodes to stop");
            return Ok(PipelineMetrics::default());
        }
        self.stop_nodes(cluster, force).await
    }

    async fn stop_nodes(&self, mut cluster: Cluster, force: bool) -> SpawnletResult<PipelineMetrics> {
        let name = cluster.name().to_string();
        cluster.state.status = ClusterStatus::Stopping;
        cluster.save()?;

        let plan = stop_plan(&cluster);
        let ctx = self.context(cluster, force)?;
        tracing::info!(cluster = %name, force, "Stopping cluster");

        let result =
            PipelineExecutor::execute(PipelineBuilder::from_plan("stop", plan), Arc::clone(&ctx))
                .await;

        let mut ctx = ctx.lock().await;
        ctx.cluster.clear_token();
        ctx.cluster.refresh_status();
        ctx.cluster.save()?;
        result
    }

    /// Stop (forced), remove machines and images no record points at, then
    /// the cluster directory.
    pub async fn destroy(&self, name: &str) -> SpawnletResult<()> {
        let layout = self.layout(name)?;
        let cluster = self.load(name)?;
        let attacher = NetworkAttacher::new(&cluster.settings.cni_plugin_dir);
        self.stop(name, true).await?;
        self.terminate_stale_machines(name, &attacher).await?;
        self.remove_stale_images(name).await?;
        layout.cleanup().map_err(|e| {
            SpawnletError::Storage(format!("failed to remove {}: {}", layout.dir().display(), e))
        })?;
        tracing::info!(cluster = %name, "Cluster destroyed");
        Ok(())
    }

    /// Every persisted cluster, sorted by name. Unreadable entries are skipped.
    pub fn list(&self) -> SpawnletResult<Vec<ClusterSummary>> {
        let dir = self.options.clusters_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match Cluster::load(ClusterLayout::new(entry.path())) {
                Ok(cluster) => summaries.push(cluster.summary()),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), "Skipping unreadable cluster: {}", e)
                }
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// Kill machines named like nodes of `cluster` that survived the stop,
    /// and release their namespaces.
    async fn terminate_stale_machines(
        &self,
        cluster: &str,
        attacher: &NetworkAttacher,
    ) -> SpawnletResult<()> {
        for machine in self.machines.list_machines().await? {
            if !is_node_of(cluster, &machine.name) {
                continue;
            }
            terminate(self.machines.as_ref(), &machine.name).await?;
            attacher.release(&machine.name)?;
            tracing::info!(cluster = %cluster, node = %machine.name, "Terminated stale node");
        }
        Ok(())
    }

    /// Remove node images of `cluster` that no node record points at any more,
    /// such as clones left behind by a state file that was lost or replaced.
    async fn remove_stale_images(&self, cluster: &str) -> SpawnletResult<()> {
        for image in self.machines.list_images().await? {
            if !is_node_of(cluster, &image.name) {
                continue;
            }
            remove_image(self.machines.as_ref(), &image.name).await?;
            tracing::info!(cluster = %cluster, image = %image.name, "Removed stale node image");
        }
        Ok(())
    }

    fn context(&self, cluster: Cluster, force: bool) -> SpawnletResult<OpCtx> {
        let spawner: Arc<dyn NodeSpawner> = match &self.spawner {
            Some(spawner) => Arc::clone(spawner),
            None => Arc::new(SystemdRunSpawner::new(cluster.settings.shim_path.clone())),
        };

        let launcher = NodeLauncher::new(
            Arc::clone(&self.machines),
            spawner,
            cluster.settings.poll,
        );
        let joiner = ControlPlaneJoiner::new(
            Arc::clone(&self.machines),
            Capabilities::for_version(cluster.settings.version()?),
        );

        Ok(Arc::new(Mutex::new(OperationContext {
            cluster,
            machines: Arc::clone(&self.machines),
            launcher,
            joiner,
            force,
        })))
    }
}
