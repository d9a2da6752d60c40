//! Starting a node as a background systemd unit running the shim.

use crate::cluster::BindSpec;
use crate::util::{find_binary, run_command};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spawnlet_shared::SpawnletResult;
use std::path::PathBuf;

pub const SYSTEMD_RUN: &str = "systemd-run";
pub const UNIT_PREFIX: &str = "spawnlet-";
pub const SHIM_BINARY: &str = "spawnlet-shim";

/// Everything the shim needs to bring one node up. Passed as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpawnSpec {
    pub machine: String,
    /// Pre-rendered `--overlay=lower:upper:target` arguments.
    pub overlays: Vec<String>,
    #[serde(default)]
    pub binds: Vec<BindSpec>,
    pub cni_plugin_dir: PathBuf,
}

impl NodeSpawnSpec {
    pub fn unit_name(&self) -> String {
        format!("{}{}", UNIT_PREFIX, self.machine)
    }

    /// Arguments for `systemd-nspawn`.
    pub fn nspawn_args(&self) -> Vec<String> {
        let mut args = vec![
            "--boot".to_string(),
            format!("--machine={}", self.machine),
            "--capability=all".to_string(),
            "--private-users=no".to_string(),
        ];
        args.extend(self.overlays.iter().cloned());
        for bind in &self.binds {
            let flag = if bind.read_only { "--bind-ro" } else { "--bind" };
            args.push(format!("{}={}:{}", flag, bind.source.display(), bind.target));
        }
        args
    }
}

/// Starts the node process in the background.
#[async_trait]
pub trait NodeSpawner: Send + Sync {
    async fn spawn(&self, spec: &NodeSpawnSpec) -> SpawnletResult<()>;
}

/// `systemd-run --unit=spawnlet-<node> --collect <shim> --config <json>`.
#[derive(Debug, Clone)]
pub struct SystemdRunSpawner {
    /// Looked up next to the executable or in `$PATH` when unset.
    shim: Option<PathBuf>,
    program: String,
}

impl SystemdRunSpawner {
    pub fn new(shim: Option<PathBuf>) -> Self {
        Self {
            shim,
            program: SYSTEMD_RUN.to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn shim_path(&self) -> SpawnletResult<PathBuf> {
        match &self.shim {
            Some(path) => Ok(path.clone()),
            None => find_binary(SHIM_BINARY),
        }
    }

    pub fn command_args(&self, spec: &NodeSpawnSpec) -> SpawnletResult<Vec<String>> {
        Ok(vec![
            format!("--unit={}", spec.unit_name()),
            "--collect".to_string(),
            "--property=KillMode=mixed".to_string(),
            self.shim_path()?.display().to_string(),
            "--config".to_string(),
            serde_json::to_string(spec)?,
        ])
    }
}

#[async_trait]
impl NodeSpawner for SystemdRunSpawner {
    async fn spawn(&self, spec: &NodeSpawnSpec) -> SpawnletResult<()> {
        let args = self.command_args(spec)?;
        run_command(&self.program, &args).await?;
        tracing::debug!(node = %spec.machine, unit = %spec.unit_name(), "Spawned node unit");
        Ok(())
    }
}
