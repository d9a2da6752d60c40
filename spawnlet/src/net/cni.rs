//! Bridge plugin invocation (CNI `ADD`).

use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha512};
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::netns::NetworkNamespace;

pub const BRIDGE_PLUGIN: &str = "bridge";
pub const BRIDGE_NAME: &str = "cni-spawnlet0";
pub const NETWORK_NAME: &str = "spawnlet";
pub const NODE_SUBNET: &str = "10.22.0.0/16";
pub const INTERFACE_NAME: &str = "eth0";

const CONTAINER_ID_PREFIX: &str = "spawnlet-";
const CONTAINER_ID_HEX_LEN: usize = 16;

/// Network configuration handed to the bridge plugin on stdin.
///
/// The bridge is shared by every node on the host and is recreated
/// idempotently by the plugin.
pub fn bridge_config() -> serde_json::Value {
    json!({
        "cniVersion": "0.3.1",
        "name": NETWORK_NAME,
        "type": BRIDGE_PLUGIN,
        "bridge": BRIDGE_NAME,
        "isGateway": true,
        "ipMasq": true,
        "ipam": {
            "type": "host-local",
            "subnet": NODE_SUBNET,
            "routes": [{ "dst": "0.0.0.0/0" }]
        }
    })
}

/// Container id derived from the namespace path.
pub fn container_id(netns: &Path) -> String {
    let digest = Sha512::digest(netns.as_os_str().as_encoded_bytes());
    let hex = hex::encode(digest);
    format!("{}{}", CONTAINER_ID_PREFIX, &hex[..CONTAINER_ID_HEX_LEN])
}

/// The plugin operations spawnlet uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniCommand {
    Add,
    Del,
}

impl CniCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Del => "DEL",
        }
    }
}

/// CNI environment. Applied on top of the inherited environment so that
/// these values always win.
pub fn cni_env(
    command: CniCommand,
    container_id: &str,
    netns: &Path,
    plugin_dir: &Path,
) -> Vec<(&'static str, String)> {
    vec![
        ("CNI_COMMAND", command.as_str().to_string()),
        ("CNI_CONTAINERID", container_id.to_string()),
        ("CNI_NETNS", netns.display().to_string()),
        ("CNI_IFNAME", INTERFACE_NAME.to_string()),
        ("CNI_PATH", plugin_dir.display().to_string()),
    ]
}

/// Parsed plugin result (only what the launcher needs).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CniResult {
    #[serde(default)]
    pub ips: Vec<CniIp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CniIp {
    pub address: String,
    #[serde(default)]
    pub gateway: Option<String>,
}

impl CniResult {
    /// First assigned address without its prefix length.
    pub fn address(&self) -> Option<&str> {
        self.ips
            .first()
            .map(|ip| ip.address.split('/').next().unwrap_or(&ip.address))
    }
}

#[derive(Deserialize)]
struct CniErrorBody {
    #[serde(default)]
    msg: String,
    #[serde(default)]
    details: String,
}

/// Creates a namespace per node and attaches it to the shared bridge.
#[derive(Debug, Clone)]
pub struct NetworkAttacher {
    plugin_dir: PathBuf,
}

impl NetworkAttacher {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
        }
    }

    /// Create the namespace for `node` and run the bridge plugin in it.
    ///
    /// A plugin failure releases the namespace and is returned as a hard error.
    pub fn attach(&self, node: &str) -> SpawnletResult<(NetworkNamespace, CniResult)> {
        let netns = NetworkNamespace::create(node)?;
        match self.add(netns.path()) {
            Ok(result) => {
                tracing::info!(node = %node, address = ?result.address(), "Attached node to bridge");
                Ok((netns, result))
            }
            Err(e) => {
                if let Err(close_err) = netns.close() {
                    tracing::warn!(node = %node, "Failed to release namespace: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Run DEL for the namespace of `node`, then unmount and remove it.
    ///
    /// A namespace that is already gone is fine. The namespace is closed even
    /// when DEL fails, and the DEL error is returned afterwards.
    pub fn release(&self, node: &str) -> SpawnletResult<()> {
        let netns = match NetworkNamespace::open(node) {
            Ok(netns) => netns,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let deleted = self.del(netns.path());
        if let Err(e) = &deleted {
            tracing::warn!(node = %node, "CNI DEL failed, releasing namespace anyway: {}", e);
        }
        netns.close()?;
        deleted
    }

    /// Invoke `<plugin_dir>/bridge` with `CNI_COMMAND=ADD` for `netns`.
    pub fn add(&self, netns: &Path) -> SpawnletResult<CniResult> {
        let stdout = self.invoke(CniCommand::Add, netns)?;
        if stdout.trim().is_empty() {
            return Ok(CniResult::default());
        }
        serde_json::from_str(&stdout).map_err(|e| {
            SpawnletError::Network(format!(
                "unparseable result from {}: {}",
                self.plugin().display(),
                e
            ))
        })
    }

    /// Invoke the plugin with `CNI_COMMAND=DEL`, returning the node's
    /// address lease to the IPAM pool.
    pub fn del(&self, netns: &Path) -> SpawnletResult<()> {
        self.invoke(CniCommand::Del, netns).map(drop)?;
        tracing::debug!(netns = %netns.display(), "Detached namespace from bridge");
        Ok(())
    }

    fn plugin(&self) -> PathBuf {
        self.plugin_dir.join(BRIDGE_PLUGIN)
    }

    /// Run the plugin once and return its stdout. The child is always waited for.
    fn invoke(&self, command: CniCommand, netns: &Path) -> SpawnletResult<String> {
        let plugin = self.plugin();
        let id = container_id(netns);
        let config = serde_json::to_vec(&bridge_config())?;

        let mut child = Command::new(&plugin)
            .envs(cni_env(command, &id, netns, &self.plugin_dir))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SpawnletError::Network(format!("failed to run {}: {}", plugin.display(), e))
            })?;

        // `stdin` is dropped after the match, which closes the pipe.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&config),
            None => Ok(()),
        };

        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(SpawnletError::Process {
                command: format!(
                    "{} (CNI_COMMAND={}, CNI_CONTAINERID={})",
                    plugin.display(),
                    command.as_str(),
                    id
                ),
                status: output.status.to_string(),
                stdout: plugin_error_message(&stdout),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        written.map_err(|e| {
            SpawnletError::Network(format!(
                "failed to write network config to {}: {}",
                plugin.display(),
                e
            ))
        })?;
        Ok(stdout)
    }
}

/// CNI plugins report errors as `{"code":..,"msg":..}` on stdout.
fn plugin_error_message(stdout: &str) -> String {
    match serde_json::from_str::<CniErrorBody>(stdout) {
        Ok(body) if !body.msg.is_empty() && !body.details.is_empty() => {
            format!("{}: {}", body.msg, body.details)
        }
        Ok(body) if !body.msg.is_empty() => body.msg,
        _ => stdout.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_plugin(dir: &TempDir, script: &str) {
        let path = dir.path().join(BRIDGE_PLUGIN);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_container_id_is_stable() {
        let a = container_id(Path::new("/run/netns/demo-master-abc123"));
        let b = container_id(Path::new("/run/netns/demo-master-abc123"));
        let c = container_id(Path::new("/run/netns/demo-worker-abc123"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("spawnlet-"));
        assert_eq!(a.len(), "spawnlet-".len() + 16);
    }

    #[test]
    fn test_bridge_config() {
        let config = bridge_config();
        assert_eq!(config["type"], "bridge");
        assert_eq!(config["isGateway"], true);
        assert_eq!(config["ipMasq"], true);
        assert_eq!(config["ipam"]["type"], "host-local");
        assert_eq!(config["ipam"]["subnet"], NODE_SUBNET);
    }

    #[test]
    fn test_add_sets_env_and_parses_result() {
        let dir = TempDir::new().unwrap();
        fake_plugin(
            &dir,
            r#"#!/bin/sh
grep -q '"type":"bridge"' || exit 4
[ "$CNI_COMMAND" = ADD ] && [ "$CNI_IFNAME" = eth0 ] || exit 3
[ "$CNI_NETNS" = /run/netns/demo-master-abc123 ] || exit 3
printf '{"cniVersion":"0.3.1","ips":[{"version":"4","address":"10.22.0.7/16","gateway":"10.22.0.1"}]}'
"#,
        );

        let result = NetworkAttacher::new(dir.path())
            .add(Path::new("/run/netns/demo-master-abc123"))
            .unwrap();

        assert_eq!(result.address(), Some("10.22.0.7"));
        assert_eq!(result.ips[0].gateway.as_deref(), Some("10.22.0.1"));
    }

    #[test]
    fn test_env_contract() {
        let env = cni_env(
            CniCommand::Add,
            "spawnlet-0011",
            Path::new("/run/netns/n"),
            Path::new("/opt/cni/bin"),
        );
        assert_eq!(
            env,
            vec![
                ("CNI_COMMAND", "ADD".to_string()),
                ("CNI_CONTAINERID", "spawnlet-0011".to_string()),
                ("CNI_NETNS", "/run/netns/n".to_string()),
                ("CNI_IFNAME", "eth0".to_string()),
                ("CNI_PATH", "/opt/cni/bin".to_string()),
            ]
        );
    }

    #[test]
    fn test_plugin_failure_is_hard_error() {
        let dir = TempDir::new().unwrap();
        fake_plugin(
            &dir,
            "#!/bin/sh\ncat > /dev/null\necho '{\"code\":11,\"msg\":\"failed to set bridge addr\",\"details\":\"permission denied\"}'\nexit 1\n",
        );

        let err = NetworkAttacher::new(dir.path())
            .add(Path::new("/run/netns/n"))
            .unwrap_err();
        let (stdout, _) = err.process_output().unwrap();
        assert_eq!(stdout, "failed to set bridge addr: permission denied");
    }

    #[test]
    fn test_del_uses_same_container_id() {
        let dir = TempDir::new().unwrap();
        let expected = container_id(Path::new("/run/netns/demo-worker-abc123"));
        fake_plugin(
            &dir,
            &format!(
                "#!/bin/sh\ncat > /dev/null\n[ \"$CNI_COMMAND\" = DEL ] || exit 3\n[ \"$CNI_CONTAINERID\" = {} ] || exit 5\n",
                expected
            ),
        );

        NetworkAttacher::new(dir.path())
            .del(Path::new("/run/netns/demo-worker-abc123"))
            .unwrap();
    }

    #[test]
    fn test_plugin_that_ignores_stdin_is_still_reaped() {
        let dir = TempDir::new().unwrap();
        fake_plugin(
            &dir,
            "#!/bin/sh\necho '{\"code\":7,\"msg\":\"invalid network config\"}'\nexit 1\n",
        );

        let err = NetworkAttacher::new(dir.path())
            .add(Path::new("/run/netns/n"))
            .unwrap_err();
        let (stdout, _) = err.process_output().unwrap();
        assert_eq!(stdout, "invalid network config");
    }

    #[test]
    fn test_release_missing_namespace_skips_plugin() {
        // An empty plugin dir would make any invocation fail.
        let dir = TempDir::new().unwrap();
        NetworkAttacher::new(dir.path())
            .release("spawnlet-test-does-not-exist")
            .unwrap();
    }
}
