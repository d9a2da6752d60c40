//! Copying Kubernetes, runtime and CNI binaries into the base layer.

use super::composer::RKT_STAGE1_PATH;
use crate::cluster::{ClusterLayout, ClusterSettings, ContainerRuntime};
use futures::future::join_all;
use spawnlet_shared::{SpawnletError, SpawnletResult, TaskFailure};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const KUBE_BINARIES: [&str; 3] = ["kubeadm", "kubelet", "kubectl"];
pub const CNI_BIN_DIR: &str = "/opt/cni/bin";

/// One host file to place in the base layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    pub source: PathBuf,
    /// Absolute path inside the node.
    pub dest: String,
    pub mode: u32,
}

impl CopyJob {
    fn binary(source: impl Into<PathBuf>, dest: String) -> Self {
        Self {
            source: source.into(),
            dest,
            mode: 0o755,
        }
    }
}

/// Where kubeadm, kubelet and kubectl come from.
///
/// A local source tree wins over the download cache.
pub fn kube_binary_dir(settings: &ClusterSettings) -> SpawnletResult<PathBuf> {
    if let Some(source) = &settings.kubernetes_source_dir {
        return Ok(source.join("_output").join("bin"));
    }
    if settings.kubernetes_version.is_empty() {
        return Err(SpawnletError::Config(
            "no kubernetes version and no source directory to take binaries from".into(),
        ));
    }
    Ok(settings.cache_dir.join(&settings.kubernetes_version))
}

/// Every copy Create performs for these settings.
pub fn copy_jobs(settings: &ClusterSettings) -> SpawnletResult<Vec<CopyJob>> {
    let kube_dir = kube_binary_dir(settings)?;
    let mut jobs: Vec<CopyJob> = KUBE_BINARIES
        .iter()
        .map(|name| CopyJob::binary(kube_dir.join(name), format!("/usr/bin/{}", name)))
        .collect();

    let paths = &settings.runtime_paths;
    let missing = |field: &str| {
        SpawnletError::Config(format!(
            "container runtime {} requires runtime_paths.{}",
            settings.container_runtime, field
        ))
    };
    match settings.container_runtime {
        // Docker ships with the base image.
        ContainerRuntime::Docker => {}
        ContainerRuntime::Rkt => {
            let rkt = paths.rkt_binary.as_ref().ok_or_else(|| missing("rkt_binary"))?;
            let stage1 = paths
                .rkt_stage1_image
                .as_ref()
                .ok_or_else(|| missing("rkt_stage1_image"))?;
            jobs.push(CopyJob::binary(rkt, "/usr/bin/rkt".to_string()));
            jobs.push(CopyJob {
                source: stage1.clone(),
                dest: RKT_STAGE1_PATH.to_string(),
                mode: 0o644,
            });
        }
        ContainerRuntime::CriO => {
            let crio = paths.crio_binary.as_ref().ok_or_else(|| missing("crio_binary"))?;
            let runc = paths.runc_binary.as_ref().ok_or_else(|| missing("runc_binary"))?;
            let conmon = paths
                .conmon_binary
                .as_ref()
                .ok_or_else(|| missing("conmon_binary"))?;
            jobs.push(CopyJob::binary(crio, "/usr/bin/crio".to_string()));
            jobs.push(CopyJob::binary(runc, "/usr/bin/runc".to_string()));
            jobs.push(CopyJob::binary(conmon, "/usr/bin/conmon".to_string()));
        }
    }

    jobs.extend(cni_jobs(&settings.cni_plugin_dir)?);
    Ok(jobs)
}

fn cni_jobs(plugin_dir: &Path) -> SpawnletResult<Vec<CopyJob>> {
    if !plugin_dir.is_dir() {
        return Err(SpawnletError::Storage(format!(
            "CNI plugin dir {} does not exist",
            plugin_dir.display()
        )));
    }

    let mut jobs = Vec::new();
    for entry in WalkDir::new(plugin_dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            SpawnletError::Storage(format!(
                "failed to read CNI plugin dir {}: {}",
                plugin_dir.display(),
                e
            ))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        jobs.push(CopyJob::binary(entry.path(), format!("{}/{}", CNI_BIN_DIR, name)));
    }
    Ok(jobs)
}

/// Run every copy concurrently; all failures are reported together.
pub async fn copy_into_base(layout: &ClusterLayout, jobs: Vec<CopyJob>) -> SpawnletResult<()> {
    let total = jobs.len();
    let results = join_all(jobs.into_iter().map(|job| async move {
        let dest = layout.base_path(&job.dest);
        let result = copy_one(&job, &dest).await;
        (job, result)
    }))
    .await;

    let failures: Vec<TaskFailure> = results
        .into_iter()
        .enumerate()
        .filter_map(|(index, (job, result))| {
            result.err().map(|error| TaskFailure {
                index,
                task: format!("copy {}", job.dest),
                error,
            })
        })
        .collect();

    if failures.is_empty() {
        tracing::info!(files = total, "Copied binaries into base layer");
        return Ok(());
    }

    Err(SpawnletError::Aggregate {
        operation: "copy binaries".to_string(),
        failures,
    })
}

async fn copy_one(job: &CopyJob, dest: &Path) -> SpawnletResult<()> {
    let storage = |e: std::io::Error| {
        SpawnletError::Storage(format!(
            "failed to copy {} to {}: {}",
            job.source.display(),
            dest.display(),
            e
        ))
    };

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(storage)?;
    }
    tokio::fs::copy(&job.source, dest).await.map_err(storage)?;
    tokio::fs::set_permissions(dest, std::fs::Permissions::from_mode(job.mode))
        .await
        .map_err(storage)?;
    tracing::debug!(source = %job.source.display(), dest = %job.dest, "Copied file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"#!/bin/sh\n").unwrap();
    }

    fn settings(tmp: &TempDir) -> ClusterSettings {
        let mut s = ClusterSettings::new("demo", "v1.9.6", tmp.path().join("cache"));
        s.cni_plugin_dir = tmp.path().join("cni");
        for name in KUBE_BINARIES {
            touch(&tmp.path().join("cache/v1.9.6").join(name));
        }
        touch(&tmp.path().join("cni/bridge"));
        touch(&tmp.path().join("cni/host-local"));
        s
    }

    #[test]
    fn test_source_dir_wins_over_cache() {
        let mut s = ClusterSettings::new("demo", "v1.9.6", "/cache");
        assert_eq!(kube_binary_dir(&s).unwrap(), PathBuf::from("/cache/v1.9.6"));

        s.kubernetes_source_dir = Some(PathBuf::from("/src/k8s"));
        assert_eq!(kube_binary_dir(&s).unwrap(), PathBuf::from("/src/k8s/_output/bin"));
    }

    #[test]
    fn test_jobs_cover_kube_runtime_and_cni() {
        let tmp = TempDir::new().unwrap();
        let mut s = settings(&tmp);
        s.container_runtime = ContainerRuntime::CriO;
        s.runtime_paths.crio_binary = Some("/usr/local/bin/crio".into());
        s.runtime_paths.runc_binary = Some("/usr/local/bin/runc".into());
        s.runtime_paths.conmon_binary = Some("/usr/local/libexec/conmon".into());

        let dests: Vec<String> = copy_jobs(&s).unwrap().into_iter().map(|j| j.dest).collect();
        assert_eq!(
            dests,
            vec![
                "/usr/bin/kubeadm",
                "/usr/bin/kubelet",
                "/usr/bin/kubectl",
                "/usr/bin/crio",
                "/usr/bin/runc",
                "/usr/bin/conmon",
                "/opt/cni/bin/bridge",
                "/opt/cni/bin/host-local",
            ]
        );
    }

    #[tokio::test]
    async fn test_copy_into_base() {
        let tmp = TempDir::new().unwrap();
        let s = settings(&tmp);
        let layout = ClusterLayout::new(tmp.path().join("clusters/demo"));

        copy_into_base(&layout, copy_jobs(&s).unwrap()).await.unwrap();

        let kubeadm = layout.base_path("/usr/bin/kubeadm");
        assert!(kubeadm.is_file());
        let mode = std::fs::metadata(&kubeadm).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(layout.base_path("/opt/cni/bin/bridge").is_file());
    }

    #[tokio::test]
    async fn test_copy_collects_every_failure() {
        let tmp = TempDir::new().unwrap();
        let s = settings(&tmp);
        std::fs::remove_file(tmp.path().join("cache/v1.9.6/kubelet")).unwrap();
        std::fs::remove_file(tmp.path().join("cache/v1.9.6/kubectl")).unwrap();
        let layout = ClusterLayout::new(tmp.path().join("clusters/demo"));

        let err = copy_into_base(&layout, copy_jobs(&s).unwrap()).await.unwrap_err();
        match err {
            SpawnletError::Aggregate { failures, .. } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].task, "copy /usr/bin/kubelet");
            }
            other => panic!("unexpected error: {other}"),
        }
        // Successful siblings still ran.
        assert!(layout.base_path("/usr/bin/kubeadm").is_file());
    }

    #[test]
    fn test_missing_cni_dir() {
        let tmp = TempDir::new().unwrap();
        let mut s = settings(&tmp);
        s.cni_plugin_dir = tmp.path().join("nope");
        assert!(matches!(copy_jobs(&s), Err(SpawnletError::Storage(_))));
    }
}
