//! `machinectl`-backed implementation of `MachineControl`.

use super::{ImageRecord, MachineControl, MachineRecord, parse_images, parse_machines};
use crate::util::{CommandOutput, run_command};
use async_trait::async_trait;
use spawnlet_shared::SpawnletResult;

const MACHINECTL: &str = "machinectl";

/// Drives `machinectl` on the local host.
#[derive(Debug, Clone)]
pub struct Machinectl {
    program: String,
}

impl Default for Machinectl {
    fn default() -> Self {
        Self {
            program: MACHINECTL.to_string(),
        }
    }
}

impl Machinectl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different binary (e.g. a wrapper script).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> SpawnletResult<CommandOutput> {
        run_command(&self.program, args).await
    }
}

#[async_trait]
impl MachineControl for Machinectl {
    async fn clone_image(&self, base: &str, dest: &str) -> SpawnletResult<()> {
        self.run(&["clone", base, dest]).await.map(drop)
    }

    async fn list_machines(&self) -> SpawnletResult<Vec<MachineRecord>> {
        let output = self.run(&["list", "--no-legend", "--full"]).await?;
        Ok(parse_machines(&output.stdout))
    }

    async fn list_images(&self) -> SpawnletResult<Vec<ImageRecord>> {
        let output = self.run(&["list-images", "--no-legend", "--full"]).await?;
        Ok(parse_images(&output.stdout))
    }

    async fn shell(&self, machine: &str, command: &[String]) -> SpawnletResult<CommandOutput> {
        let mut args: Vec<&str> = vec!["shell", machine];
        args.extend(command.iter().map(String::as_str));
        self.run(&args).await
    }

    async fn poweroff(&self, machine: &str) -> SpawnletResult<()> {
        self.run(&["poweroff", machine]).await.map(drop)
    }

    async fn terminate(&self, machine: &str) -> SpawnletResult<()> {
        self.run(&["terminate", machine]).await.map(drop)
    }

    async fn remove_image(&self, image: &str) -> SpawnletResult<()> {
        self.run(&["remove", image]).await.map(drop)
    }

    async fn show_image(&self, image: &str) -> SpawnletResult<()> {
        self.run(&["show-image", image]).await.map(drop)
    }
}
