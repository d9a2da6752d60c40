//! Master init and worker join.
//!
//! ```text
//! Uninitialized --init_master--> MasterInitialized --join_worker x N--> Ready
//! ```
//!
//! The token and master address are written once by `init_master` and only
//! read by `join_worker`.

use super::token::generate_token;
use super::version::{Capabilities, Capability};
use crate::cluster::{Cluster, ControlPlanePhase};
use crate::machine::{MachineControl, machine_address};
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::sync::Arc;

pub const KUBEADM: &str = "/usr/bin/kubeadm";
pub const KUBECTL: &str = "/usr/bin/kubectl";
pub const KUBEADM_CONFIG_PATH: &str = "/etc/kubeadm.yml";
pub const ADMIN_CONF_PATH: &str = "/etc/kubernetes/admin.conf";
pub const API_SERVER_PORT: u16 = 6443;

/// Pod network applied right after `kubeadm init`.
pub const OVERLAY_NETWORK_MANIFEST: &str = "https://git.io/weave-kube-1.6";

/// Drives kubeadm inside nodes through `MachineControl::shell`.
#[derive(Clone)]
pub struct ControlPlaneJoiner {
    machines: Arc<dyn MachineControl>,
    capabilities: Capabilities,
}

impl ControlPlaneJoiner {
    pub fn new(machines: Arc<dyn MachineControl>, capabilities: Capabilities) -> Self {
        Self {
            machines,
            capabilities,
        }
    }

    /// Initialize the control plane on `master`.
    ///
    /// On success the cluster holds a fresh token and the master address and
    /// `admin.kubeconfig` exists in the cluster directory. On failure the token
    /// is cleared before the error is returned.
    pub async fn init_master(&self, cluster: &mut Cluster, master: &str) -> SpawnletResult<()> {
        match self.try_init_master(cluster, master).await {
            Ok(()) => {
                cluster.state.phase = ControlPlanePhase::MasterInitialized;
                tracing::info!(cluster = %cluster.name(), node = %master, "Control plane initialized");
                Ok(())
            }
            Err(e) => {
                cluster.clear_token();
                Err(e)
            }
        }
    }

    async fn try_init_master(&self, cluster: &mut Cluster, master: &str) -> SpawnletResult<()> {
        self.run(master, &[KUBEADM, "init", &format!("--config={}", KUBEADM_CONFIG_PATH)])
            .await?;

        self.run(
            master,
            &[
                KUBECTL,
                "--kubeconfig",
                ADMIN_CONF_PATH,
                "apply",
                "-f",
                OVERLAY_NETWORK_MANIFEST,
            ],
        )
        .await?;

        let token = generate_token();
        cluster.state.token = Some(token.clone());
        self.run(master, &[KUBEADM, "token", "create", &token, "--ttl=0"])
            .await?;

        let ip = machine_address(self.machines.as_ref(), master)
            .await?
            .ok_or_else(|| {
                SpawnletError::Network(format!("no address reported for master node {}", master))
            })?;
        cluster.state.master_ip = Some(ip);

        let source = cluster.layout.machine_path(master, ADMIN_CONF_PATH);
        let dest = cluster.layout.kubeconfig_path();
        tokio::fs::copy(&source, &dest).await.map_err(|e| {
            SpawnletError::Storage(format!(
                "failed to copy {} to {}: {}",
                source.display(),
                dest.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Join `worker` to the control plane at `master_ip`.
    pub async fn join_worker(&self, master_ip: &str, token: &str, worker: &str) -> SpawnletResult<()> {
        if token.is_empty() {
            return Err(SpawnletError::InvalidState(format!(
                "cannot join {}: bootstrap token is empty",
                worker
            )));
        }
        if master_ip.is_empty() {
            return Err(SpawnletError::InvalidState(format!(
                "cannot join {}: master address is empty",
                worker
            )));
        }

        let args = self.join_command(master_ip, token);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(worker, &args).await
    }

    /// `kubeadm join` argv for the target version.
    pub fn join_command(&self, master_ip: &str, token: &str) -> Vec<String> {
        let mut args = vec![
            KUBEADM.to_string(),
            "join".to_string(),
            "--token".to_string(),
            token.to_string(),
        ];
        if self
            .capabilities
            .supports(Capability::DiscoveryTokenUnsafeSkipCaVerification)
        {
            args.push("--discovery-token-unsafe-skip-ca-verification".to_string());
        }
        args.push(format!("{}:{}", master_ip, API_SERVER_PORT));
        args
    }

    async fn run(&self, node: &str, args: &[&str]) -> SpawnletResult<()> {
        let command: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.machines.shell(node, &command).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterLayout, ClusterSettings};
    use crate::testing::FakeHost;
    use tempfile::TempDir;

    fn joiner(host: &Arc<FakeHost>, version: &str) -> ControlPlaneJoiner {
        let caps = Capabilities::for_version(Some(version.parse().unwrap()));
        ControlPlaneJoiner::new(host.clone(), caps)
    }

    fn cluster(dir: &TempDir) -> Cluster {
        let layout = ClusterLayout::new(dir.path().join("demo"));
        std::fs::create_dir_all(layout.dir()).unwrap();
        Cluster::new(ClusterSettings::new("demo", "v1.9.6", "/cache"), layout)
    }

    #[test]
    fn test_join_includes_skip_ca_flag_from_1_8() {
        let host = Arc::new(FakeHost::new());
        let args = joiner(&host, "v1.8.0").join_command("10.22.0.2", "abcdef.0123456789abcdef");
        assert_eq!(
            args,
            vec![
                KUBEADM,
                "join",
                "--token",
                "abcdef.0123456789abcdef",
                "--discovery-token-unsafe-skip-ca-verification",
                "10.22.0.2:6443",
            ]
        );
    }

    #[test]
    fn test_join_omits_skip_ca_flag_below_1_8() {
        let host = Arc::new(FakeHost::new());
        let args = joiner(&host, "v1.7.5").join_command("10.22.0.2", "abcdef.0123456789abcdef");
        assert!(
            !args
                .iter()
                .any(|a| a == "--discovery-token-unsafe-skip-ca-verification")
        );
        assert_eq!(args.last().unwrap(), "10.22.0.2:6443");
    }

    #[tokio::test]
    async fn test_join_fails_fast_without_token_or_ip() {
        let host = Arc::new(FakeHost::new());
        let j = joiner(&host, "v1.9.6");

        let err = j.join_worker("10.22.0.2", "", "w").await.unwrap_err();
        assert!(matches!(err, SpawnletError::InvalidState(_)));
        let err = j.join_worker("", "abcdef.0123456789abcdef", "w").await.unwrap_err();
        assert!(matches!(err, SpawnletError::InvalidState(_)));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_master_stores_token_ip_and_kubeconfig() {
        let dir = TempDir::new().unwrap();
        let mut c = cluster(&dir);
        let host = Arc::new(FakeHost::new().with_layout(c.layout.clone()));
        host.register_running("demo-master-aaaaaa", "10.22.0.2");

        joiner(&host, "v1.9.6")
            .init_master(&mut c, "demo-master-aaaaaa")
            .await
            .unwrap();

        assert!(c.state.token.as_deref().is_some_and(crate::controlplane::is_valid_token));
        assert_eq!(c.state.master_ip.as_deref(), Some("10.22.0.2"));
        assert_eq!(c.state.phase, ControlPlanePhase::MasterInitialized);
        assert!(c.layout.kubeconfig_path().exists());
    }

    #[tokio::test]
    async fn test_init_master_failure_clears_token() {
        let dir = TempDir::new().unwrap();
        let mut c = cluster(&dir);
        // Not registered as running, so the address lookup fails after the
        // token was already created.
        let host = Arc::new(FakeHost::new().with_layout(c.layout.clone()));

        let err = joiner(&host, "v1.9.6")
            .init_master(&mut c, "demo-master-aaaaaa")
            .await
            .unwrap_err();

        assert!(matches!(err, SpawnletError::Network(_)));
        assert_eq!(c.state.token, None);
        assert_eq!(c.state.master_ip, None);
        assert!(
            host.calls()
                .iter()
                .any(|call| call.contains("token create"))
        );
    }
}
