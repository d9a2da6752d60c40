//! Base layer preparation.
//!
//! Writes the generated and templated files every node sees through its
//! overlays. Only paths below `/etc`, `/opt` and `/usr/bin` are visible in a
//! node, so everything the base layer provides lives there.

use super::overlay::OVERLAY_TARGETS;
use super::templates::{BOOTSTRAP_TEMPLATE, KUBEADM_TEMPLATE, TemplateRenderer, TemplateVars};
use crate::cluster::{ClusterLayout, ClusterSettings, ContainerRuntime};
use crate::controlplane::KUBEADM_CONFIG_PATH;
use serde_json::json;
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub const BOOTSTRAP_SCRIPT_PATH: &str = "/opt/bootstrap.sh";
pub const NETWORK_UNIT_PATH: &str = "/etc/systemd/network/50-spawnlet.network";
pub const KUBELET_UNIT_PATH: &str = "/etc/systemd/system/kubelet.service";
pub const RKT_STAGE1_PATH: &str = "/opt/rkt/stage1-coreos.aci";
pub const POD_SUBNET: &str = "10.32.0.0/12";

const CRIO_SOCKET: &str = "/var/run/crio/crio.sock";
const RKTLET_SOCKET: &str = "/var/run/rktlet.sock";

/// Interfaces created by the container runtime and pod network.
/// networkd must leave them alone or it fights the CNI plugins.
const NETWORK_UNIT: &str = "\
[Match]
Name=weave datapath vethwe* veth* cni* docker*

[Link]
Unmanaged=yes
";

/// One file written into the base layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseFile {
    /// Absolute path inside the node.
    pub path: String,
    pub contents: String,
    pub mode: u32,
}

impl BaseFile {
    fn new(path: &str, contents: String) -> Self {
        Self {
            path: path.to_string(),
            contents,
            mode: 0o644,
        }
    }

    fn executable(mut self) -> Self {
        self.mode = 0o755;
        self
    }
}

/// Create the base layer tree and write every base file into it.
///
/// Returns the written files. Any failure aborts; the caller owns cleanup.
pub fn prepare_base(settings: &ClusterSettings, layout: &ClusterLayout) -> SpawnletResult<Vec<BaseFile>> {
    for target in OVERLAY_TARGETS {
        create_dir(&layout.base_path(target))?;
    }
    create_dir(&layout.machines_dir())?;

    let files = base_files(settings)?;
    for file in &files {
        write_file(&layout.base_path(&file.path), file)?;
    }

    tracing::info!(cluster = %settings.name, files = files.len(), "Prepared base layer");
    Ok(files)
}

/// Contents of the base layer: three generated files and two templated ones.
pub fn base_files(settings: &ClusterSettings) -> SpawnletResult<Vec<BaseFile>> {
    let renderer = TemplateRenderer::from_embedded()?;
    let vars = template_vars(settings);

    Ok(vec![
        runtime_config(settings),
        BaseFile::new(NETWORK_UNIT_PATH, NETWORK_UNIT.to_string()),
        BaseFile::new(KUBELET_UNIT_PATH, kubelet_unit(settings.container_runtime)),
        BaseFile::new(BOOTSTRAP_SCRIPT_PATH, renderer.render(BOOTSTRAP_TEMPLATE, &vars)?).executable(),
        BaseFile::new(KUBEADM_CONFIG_PATH, renderer.render(KUBEADM_TEMPLATE, &vars)?),
    ])
}

fn template_vars(settings: &ClusterSettings) -> TemplateVars {
    TemplateVars {
        cluster_name: settings.name.clone(),
        kubernetes_version: settings.kubernetes_version.clone(),
        hyperkube_image: settings.hyperkube_image.clone().unwrap_or_default(),
        runtime: settings.container_runtime.to_string(),
        cri_socket: cri_socket(settings.container_runtime)
            .unwrap_or_default()
            .to_string(),
        pod_subnet: POD_SUBNET.to_string(),
    }
}

fn cri_socket(runtime: ContainerRuntime) -> Option<&'static str> {
    match runtime {
        ContainerRuntime::Docker => None,
        ContainerRuntime::CriO => Some(CRIO_SOCKET),
        ContainerRuntime::Rkt => Some(RKTLET_SOCKET),
    }
}

fn runtime_config(settings: &ClusterSettings) -> BaseFile {
    match settings.container_runtime {
        ContainerRuntime::Docker => {
            let daemon = json!({
                "exec-opts": ["native.cgroupdriver=cgroupfs"],
                "storage-driver": "overlay2",
                "iptables": true,
            });
            BaseFile::new("/etc/docker/daemon.json", daemon.to_string())
        }
        ContainerRuntime::Rkt => {
            let paths = json!({
                "rktKind": "paths",
                "rktVersion": "v1",
                "stage1-images": Path::new(RKT_STAGE1_PATH)
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            });
            BaseFile::new("/etc/rkt/paths.d/paths.json", paths.to_string())
        }
        ContainerRuntime::CriO => {
            let conf = format!(
                "[crio]\n\
                 [crio.api]\n\
                 listen = \"{}\"\n\
                 [crio.runtime]\n\
                 runtime = \"/usr/bin/runc\"\n\
                 conmon = \"/usr/bin/conmon\"\n\
                 cgroup_manager = \"cgroupfs\"\n",
                CRIO_SOCKET
            );
            BaseFile::new("/etc/crio/crio.conf", conf)
        }
    }
}

fn kubelet_unit(runtime: ContainerRuntime) -> String {
    let runtime_args = match cri_socket(runtime) {
        Some(socket) => format!(
            " --container-runtime=remote --container-runtime-endpoint=unix://{} --runtime-request-timeout=15m",
            socket
        ),
        None => String::new(),
    };

    format!(
        "[Unit]\n\
         Description=kubelet\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Environment=\"KUBELET_KUBECONFIG_ARGS=--bootstrap-kubeconfig=/etc/kubernetes/bootstrap-kubelet.conf --kubeconfig=/etc/kubernetes/kubelet.conf\"\n\
         ExecStart=/usr/bin/kubelet $KUBELET_KUBECONFIG_ARGS --pod-manifest-path=/etc/kubernetes/manifests \
         --network-plugin=cni --cni-conf-dir=/etc/cni/net.d --cni-bin-dir=/opt/cni/bin \
         --cgroup-driver=cgroupfs --fail-swap-on=false --enforce-node-allocatable= \
         --cgroups-per-qos=false{}\n\
         Restart=always\n\
         RestartSec=5\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        runtime_args
    )
}

fn create_dir(path: &Path) -> SpawnletResult<()> {
    std::fs::create_dir_all(path).map_err(|e| {
        SpawnletError::Storage(format!("failed to create {}: {}", path.display(), e))
    })
}

fn write_file(dest: &Path, file: &BaseFile) -> SpawnletResult<()> {
    if let Some(parent) = dest.parent() {
        create_dir(parent)?;
    }
    std::fs::write(dest, &file.contents)
        .and_then(|_| std::fs::set_permissions(dest, std::fs::Permissions::from_mode(file.mode)))
        .map_err(|e| SpawnletError::Storage(format!("failed to write {}: {}", dest.display(), e)))?;
    tracing::debug!(path = %file.path, "Wrote base file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_base_writes_five_files() {
        let tmp = TempDir::new().unwrap();
        let layout = ClusterLayout::new(tmp.path().join("demo"));
        let settings = ClusterSettings::new("demo", "v1.9.6", "/cache");

        let files = prepare_base(&settings, &layout).unwrap();
        assert_eq!(files.len(), 5);
        for file in &files {
            assert!(layout.base_path(&file.path).is_file(), "{}", file.path);
        }

        let script = layout.base_path(BOOTSTRAP_SCRIPT_PATH);
        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(layout.base_path("/etc/docker/daemon.json").is_file());
        assert!(layout.machines_dir().is_dir());
    }

    #[test]
    fn test_runtime_specific_files() {
        let mut settings = ClusterSettings::new("demo", "v1.9.6", "/cache");
        settings.container_runtime = ContainerRuntime::CriO;
        let files = base_files(&settings).unwrap();

        assert!(files.iter().any(|f| f.path == "/etc/crio/crio.conf"));
        let kubelet = files.iter().find(|f| f.path == KUBELET_UNIT_PATH).unwrap();
        assert!(kubelet.contents.contains("unix:///var/run/crio/crio.sock"));

        settings.container_runtime = ContainerRuntime::Rkt;
        let files = base_files(&settings).unwrap();
        let paths = files
            .iter()
            .find(|f| f.path == "/etc/rkt/paths.d/paths.json")
            .unwrap();
        assert!(paths.contents.contains("/opt/rkt"));
    }

    #[test]
    fn test_write_failure_is_storage_error() {
        let tmp = TempDir::new().unwrap();
        // A file where the cluster directory should be.
        let blocker = tmp.path().join("demo");
        std::fs::write(&blocker, "").unwrap();
        let layout = ClusterLayout::new(&blocker);

        let err = prepare_base(&ClusterSettings::new("demo", "v1.9.6", "/cache"), &layout).unwrap_err();
        assert!(matches!(err, SpawnletError::Storage(_)));
    }
}
