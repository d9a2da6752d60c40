//! In-memory host used by unit tests.
//!
//! Implements both `MachineControl` and `NodeSpawner`, records every call in
//! order, and can be told to fail chosen nodes.

use crate::cluster::ClusterLayout;
use crate::controlplane::ADMIN_CONF_PATH;
use crate::machine::{ImageRecord, MachineControl, MachineRecord};
use crate::node::{NodeSpawnSpec, NodeSpawner};
use crate::util::CommandOutput;
use async_trait::async_trait;
use parking_lot::Mutex;
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    /// Node clones.
    images: BTreeSet<String>,
    /// Images present before any clone, e.g. `flatcar`.
    base_images: BTreeSet<String>,
    running: BTreeMap<String, String>,
    next_host: u8,
    /// Name fragments; a node fails when its name contains one.
    fail_clone: Vec<String>,
    fail_spawn: Vec<String>,
    fail_shell: Vec<(String, String)>,
    /// Machines that ignore poweroff.
    stuck: Vec<String>,
    /// Machines whose poweroff command itself fails.
    wedged: Vec<String>,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
    layout: Option<ClusterLayout>,
}

impl FakeHost {
    /// A host that has the `flatcar` base image.
    pub fn new() -> Self {
        let host = Self::default();
        host.state.lock().base_images.insert("flatcar".to_string());
        host
    }

    /// Write `admin.conf` into the master's layer when `kubeadm init` runs.
    pub fn with_layout(mut self, layout: ClusterLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn register_running(&self, name: &str, address: &str) {
        self.state
            .lock()
            .running
            .insert(name.to_string(), address.to_string());
    }

    pub fn running(&self) -> Vec<String> {
        self.state.lock().running.keys().cloned().collect()
    }

    /// Cloned node images; base images are not included.
    pub fn images(&self) -> Vec<String> {
        self.state.lock().images.iter().cloned().collect()
    }

    /// Fail cloning every node whose name contains `pattern`.
    pub fn fail_clone(&self, pattern: &str) {
        self.state.lock().fail_clone.push(pattern.to_string());
    }

    /// Fail spawning every node whose name contains `pattern`.
    pub fn fail_spawn(&self, pattern: &str) {
        self.state.lock().fail_spawn.push(pattern.to_string());
    }

    /// Fail `shell` on nodes whose name contains `node` when the command line
    /// contains `needle`.
    pub fn fail_shell(&self, node: &str, needle: &str) {
        self.state
            .lock()
            .fail_shell
            .push((node.to_string(), needle.to_string()));
    }

    /// Nodes whose name contains `pattern` stay up after poweroff.
    pub fn ignore_poweroff(&self, pattern: &str) {
        self.state.lock().stuck.push(pattern.to_string());
    }

    /// `poweroff` fails outright on nodes whose name contains `pattern`.
    pub fn fail_poweroff(&self, pattern: &str) {
        self.state.lock().wedged.push(pattern.to_string());
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn failure(command: String) -> SpawnletError {
        SpawnletError::Process {
            command,
            status: "exit status: 1".to_string(),
            stdout: String::new(),
            stderr: "injected failure".to_string(),
        }
    }

    fn write_admin_conf(&self, machine: &str) -> SpawnletResult<()> {
        if let Some(layout) = &self.layout {
            let path = layout.machine_path(machine, ADMIN_CONF_PATH);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, format!("# admin kubeconfig for {}\n", machine))?;
        }
        Ok(())
    }
}

#[async_trait]
impl MachineControl for FakeHost {
    async fn clone_image(&self, base: &str, dest: &str) -> SpawnletResult<()> {
        let call = format!("clone {} {}", base, dest);
        self.record(call.clone());
        let mut state = self.state.lock();
        if state.fail_clone.iter().any(|p| dest.contains(p.as_str())) {
            return Err(Self::failure(call));
        }
        state.images.insert(dest.to_string());
        Ok(())
    }

    async fn list_machines(&self) -> SpawnletResult<Vec<MachineRecord>> {
        self.record("list".to_string());
        Ok(self
            .state
            .lock()
            .running
            .iter()
            .map(|(name, address)| MachineRecord {
                name: name.clone(),
                class: "container".to_string(),
                service: "systemd-nspawn".to_string(),
                address: Some(address.clone()),
            })
            .collect())
    }

    async fn list_images(&self) -> SpawnletResult<Vec<ImageRecord>> {
        self.record("list-images".to_string());
        let state = self.state.lock();
        Ok(state
            .base_images
            .iter()
            .chain(state.images.iter())
            .map(|name| ImageRecord {
                name: name.clone(),
                kind: "directory".to_string(),
                read_only: false,
            })
            .collect())
    }

    async fn shell(&self, machine: &str, command: &[String]) -> SpawnletResult<CommandOutput> {
        let line = command.join(" ");
        let call = format!("shell {} {}", machine, line);
        self.record(call.clone());

        let fails = self
            .state
            .lock()
            .fail_shell
            .iter()
            .any(|(node, needle)| machine.contains(node.as_str()) && line.contains(needle.as_str()));
        if fails {
            return Err(Self::failure(call));
        }

        if line.contains("kubeadm init") {
            self.write_admin_conf(machine)?;
        }
        Ok(CommandOutput::default())
    }

    async fn poweroff(&self, machine: &str) -> SpawnletResult<()> {
        self.record(format!("poweroff {}", machine));
        let mut state = self.state.lock();
        if !state.running.contains_key(machine) {
            return Err(SpawnletError::NotFound(machine.to_string()));
        }
        if state.wedged.iter().any(|p| machine.contains(p.as_str())) {
            return Err(Self::failure(format!("poweroff {}", machine)));
        }
        if !state.stuck.iter().any(|p| machine.contains(p.as_str())) {
            state.running.remove(machine);
        }
        Ok(())
    }

    async fn terminate(&self, machine: &str) -> SpawnletResult<()> {
        self.record(format!("terminate {}", machine));
        match self.state.lock().running.remove(machine) {
            Some(_) => Ok(()),
            None => Err(SpawnletError::NotFound(machine.to_string())),
        }
    }

    async fn remove_image(&self, image: &str) -> SpawnletResult<()> {
        let call = format!("remove {}", image);
        self.record(call.clone());
        let mut state = self.state.lock();
        // machinectl refuses to remove the image of a running machine.
        if state.running.contains_key(image) {
            return Err(Self::failure(call));
        }
        if state.images.remove(image) {
            Ok(())
        } else {
            Err(SpawnletError::NotFound(image.to_string()))
        }
    }

    async fn show_image(&self, image: &str) -> SpawnletResult<()> {
        self.record(format!("show-image {}", image));
        let state = self.state.lock();
        if state.images.contains(image) || state.base_images.contains(image) {
            Ok(())
        } else {
            Err(SpawnletError::NotFound(image.to_string()))
        }
    }
}

#[async_trait]
impl NodeSpawner for FakeHost {
    async fn spawn(&self, spec: &NodeSpawnSpec) -> SpawnletResult<()> {
        let call = format!("spawn {}", spec.machine);
        self.record(call.clone());
        let mut state = self.state.lock();
        if state.fail_spawn.iter().any(|p| spec.machine.contains(p.as_str())) {
            return Err(Self::failure(call));
        }
        state.next_host += 1;
        let address = format!("10.22.0.{}", state.next_host + 1);
        state.running.insert(spec.machine.clone(), address);
        Ok(())
    }
}
