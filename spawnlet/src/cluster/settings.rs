//! Cluster settings (immutable after validation).

use crate::controlplane::KubeVersion;
use serde::{Deserialize, Serialize};
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::validate_cluster_name;

pub const DEFAULT_BASE_IMAGE: &str = "flatcar";
pub const DEFAULT_CNI_PLUGIN_DIR: &str = "/opt/cni/bin";
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Container runtime started inside every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerRuntime {
    #[serde(rename = "docker")]
    Docker,
    #[serde(rename = "rkt")]
    Rkt,
    #[serde(rename = "cri-o")]
    CriO,
}

impl ContainerRuntime {
    pub const ALL: [ContainerRuntime; 3] = [Self::Docker, Self::Rkt, Self::CriO];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Rkt => "rkt",
            Self::CriO => "cri-o",
        }
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerRuntime {
    type Err = SpawnletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| {
                SpawnletError::Config(format!(
                    "unsupported container runtime '{}' (supported: docker, rkt, cri-o)",
                    s
                ))
            })
    }
}

/// Host paths of runtime-specific binaries copied into the base layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePaths {
    pub rkt_binary: Option<PathBuf>,
    pub rkt_stage1_image: Option<PathBuf>,
    pub crio_binary: Option<PathBuf>,
    pub runc_binary: Option<PathBuf>,
    pub conmon_binary: Option<PathBuf>,
}

/// Host directory bound into every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindSpec {
    pub source: PathBuf,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl BindSpec {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// How long to wait for a node to report running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            attempts: 30,
        }
    }
}

impl PollPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub name: String,
    /// Target version, e.g. `v1.9.6`. May be empty only for dev builds that
    /// provide both `hyperkube_image` and `kubernetes_source_dir`.
    #[serde(default)]
    pub kubernetes_version: String,
    #[serde(default)]
    pub hyperkube_image: Option<String>,
    #[serde(default)]
    pub kubernetes_source_dir: Option<PathBuf>,
    pub container_runtime: ContainerRuntime,
    #[serde(default)]
    pub runtime_paths: RuntimePaths,
    /// Machine image every node is cloned from.
    pub base_image: String,
    pub cni_plugin_dir: PathBuf,
    /// Holds downloaded Kubernetes binaries under `<cache_dir>/<version>/`.
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub binds: Vec<BindSpec>,
    /// Optional cap on concurrently provisioned nodes.
    #[serde(default)]
    pub max_parallel: Option<usize>,
    #[serde(default)]
    pub poll: PollPolicy,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Node-start shim binary; looked up next to the executable when unset.
    #[serde(default)]
    pub shim_path: Option<PathBuf>,
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

impl ClusterSettings {
    /// Settings with defaults for everything but the name, version and cache.
    pub fn new(
        name: impl Into<String>,
        kubernetes_version: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            kubernetes_version: kubernetes_version.into(),
            hyperkube_image: None,
            kubernetes_source_dir: None,
            container_runtime: ContainerRuntime::Docker,
            runtime_paths: RuntimePaths::default(),
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            cni_plugin_dir: PathBuf::from(DEFAULT_CNI_PLUGIN_DIR),
            cache_dir: cache_dir.into(),
            binds: Vec::new(),
            max_parallel: None,
            poll: PollPolicy::default(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            shim_path: None,
        }
    }

    /// Check every invariant; performs no I/O.
    pub fn validate(&self) -> SpawnletResult<()> {
        validate_cluster_name(&self.name)?;

        if self.kubernetes_version.is_empty() {
            if self.hyperkube_image.is_none() || self.kubernetes_source_dir.is_none() {
                return Err(SpawnletError::Config(
                    "kubernetes_version may only be empty when both hyperkube_image and \
                     kubernetes_source_dir are set"
                        .into(),
                ));
            }
        } else {
            self.kubernetes_version.parse::<KubeVersion>()?;
        }

        self.validate_runtime_paths()?;

        if self.base_image.is_empty() {
            return Err(SpawnletError::Config("base_image must not be empty".into()));
        }
        if self.cni_plugin_dir.as_os_str().is_empty() {
            return Err(SpawnletError::Config("cni_plugin_dir must not be empty".into()));
        }
        if self.poll.attempts == 0 {
            return Err(SpawnletError::Config("poll.attempts must be at least 1".into()));
        }
        for bind in &self.binds {
            if !bind.target.starts_with('/') {
                return Err(SpawnletError::Config(format!(
                    "bind target must be absolute, got '{}'",
                    bind.target
                )));
            }
        }

        Ok(())
    }

    fn validate_runtime_paths(&self) -> SpawnletResult<()> {
        let paths = &self.runtime_paths;
        let required: Vec<(&str, &Option<PathBuf>)> = match self.container_runtime {
            ContainerRuntime::Docker => Vec::new(),
            ContainerRuntime::Rkt => vec![
                ("rkt_binary", &paths.rkt_binary),
                ("rkt_stage1_image", &paths.rkt_stage1_image),
            ],
            ContainerRuntime::CriO => vec![
                ("crio_binary", &paths.crio_binary),
                ("runc_binary", &paths.runc_binary),
                ("conmon_binary", &paths.conmon_binary),
            ],
        };

        for (field, value) in required {
            if value.is_none() {
                return Err(SpawnletError::Config(format!(
                    "container runtime {} requires runtime_paths.{}",
                    self.container_runtime, field
                )));
            }
        }
        Ok(())
    }

    /// Parsed target version; `None` for dev builds without a version.
    pub fn version(&self) -> SpawnletResult<Option<KubeVersion>> {
        if self.kubernetes_version.is_empty() {
            return Ok(None);
        }
        self.kubernetes_version.parse().map(Some)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
