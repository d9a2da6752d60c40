//! Persistent network namespaces under `/run/netns`.
//!
//! A namespace is kept alive by bind-mounting `/proc/thread-self/ns/net` of
//! the thread that created it onto `/run/netns/<node>`. The node-start shim
//! enters it and then execs away; Stop releases it by name later through
//! `NetworkAttacher::release`.

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sched::{CloneFlags, setns, unshare};
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::fs::File;
use std::path::{Path, PathBuf};

pub const NETNS_RUN_DIR: &str = "/run/netns";

#[derive(Debug)]
pub struct NetworkNamespace {
    path: PathBuf,
}

impl NetworkNamespace {
    /// Bind-mount path of the namespace belonging to `node`.
    pub fn path_for(node: &str) -> PathBuf {
        Path::new(NETNS_RUN_DIR).join(node)
    }

    /// Create a new namespace for `node`.
    pub fn create(node: &str) -> SpawnletResult<Self> {
        Self::create_at(Self::path_for(node))
    }

    pub fn create_at(path: PathBuf) -> SpawnletResult<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                SpawnletError::Network(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        File::create(&path).map_err(|e| {
            SpawnletError::Network(format!("failed to create {}: {}", path.display(), e))
        })?;

        // unshare() moves the calling thread; do it on a throwaway thread so
        // the caller stays in its own namespace until it calls enter().
        let target = path.clone();
        let created = std::thread::spawn(move || -> SpawnletResult<()> {
            unshare(CloneFlags::CLONE_NEWNET)
                .map_err(|e| SpawnletError::Network(format!("unshare(CLONE_NEWNET) failed: {}", e)))?;
            mount(
                Some("/proc/thread-self/ns/net"),
                &target,
                None::<&str>,
                MsFlags::MS_BIND,
                None::<&str>,
            )
            .map_err(|e| {
                SpawnletError::Network(format!(
                    "failed to bind-mount namespace at {}: {}",
                    target.display(),
                    e
                ))
            })
        })
        .join()
        .map_err(|_| SpawnletError::Internal("namespace creation thread panicked".into()))
        .and_then(|r| r);

        if let Err(e) = created {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        tracing::debug!(path = %path.display(), "Created network namespace");
        Ok(Self { path })
    }

    /// Handle to an existing namespace.
    pub fn open(node: &str) -> SpawnletResult<Self> {
        let path = Self::path_for(node);
        if !path.exists() {
            return Err(SpawnletError::NotFound(format!(
                "network namespace {}",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Switch the calling thread into the namespace.
    ///
    /// Call from a single-threaded context: the switch applies to the current
    /// OS thread only, and every child it spawns or execs inherits it.
    pub fn enter(&self) -> SpawnletResult<()> {
        let file = File::open(&self.path).map_err(|e| {
            SpawnletError::Network(format!("failed to open {}: {}", self.path.display(), e))
        })?;
        setns(&file, CloneFlags::CLONE_NEWNET).map_err(|e| {
            SpawnletError::Network(format!("setns({}) failed: {}", self.path.display(), e))
        })?;
        tracing::debug!(path = %self.path.display(), "Entered network namespace");
        Ok(())
    }

    /// Unmount and remove the namespace. Already-released namespaces are fine.
    pub fn close(self) -> SpawnletResult<()> {
        match umount2(&self.path, MntFlags::MNT_DETACH) {
            Ok(()) | Err(nix::errno::Errno::EINVAL) | Err(nix::errno::Errno::ENOENT) => {}
            Err(e) => {
                return Err(SpawnletError::Network(format!(
                    "failed to unmount {}: {}",
                    self.path.display(),
                    e
                )));
            }
        }
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(SpawnletError::Network(
                format!("failed to remove {}: {}", self.path.display(), e),
            )),
            _ => {
                tracing::debug!(path = %self.path.display(), "Released network namespace");
                Ok(())
            }
        }
    }
}
