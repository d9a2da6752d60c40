//! Process-wide options: where cluster directories and logs live.

use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::path::{Path, PathBuf};

const HOME_ENV: &str = "SPAWNLET_HOME";

#[derive(Debug, Clone)]
pub struct SpawnletOptions {
    /// Root of all spawnlet state (must be absolute).
    pub home_dir: PathBuf,
}

impl Default for SpawnletOptions {
    fn default() -> Self {
        let home_dir = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::data_local_dir().map(|d| d.join("spawnlet")))
            .unwrap_or_else(|| PathBuf::from("/var/lib/spawnlet"));
        Self { home_dir }
    }
}

impl SpawnletOptions {
    pub fn new(home_dir: impl Into<PathBuf>) -> SpawnletResult<Self> {
        let options = Self {
            home_dir: home_dir.into(),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> SpawnletResult<()> {
        if !self.home_dir.is_absolute() {
            return Err(SpawnletError::Config(format!(
                "home_dir must be absolute path, got: {}",
                self.home_dir.display()
            )));
        }
        Ok(())
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn clusters_dir(&self) -> PathBuf {
        self.home_dir.join("clusters")
    }

    pub fn cluster_dir(&self, name: &str) -> PathBuf {
        self.clusters_dir().join(name)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }
}
