//! `spawnlet-shim`: brings up one node.
//!
//! Started by the launcher as
//! `systemd-run --unit=spawnlet-<node> --collect spawnlet-shim --config <json>`.
//! It attaches a fresh network namespace to the cluster bridge, enters it on
//! its only thread and then replaces itself with `systemd-nspawn`, which
//! inherits the namespace.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use spawnlet::init_stderr_logging;
use spawnlet::net::{NetworkAttacher, require_network_capabilities};
use spawnlet::node::NodeSpawnSpec;
use spawnlet::util::find_binary;
use std::os::unix::process::CommandExt;
use std::process::Command;

const NSPAWN: &str = "systemd-nspawn";

#[derive(Parser)]
#[command(name = "spawnlet-shim")]
struct ShimArgs {
    /// Node spawn spec as JSON
    #[arg(long)]
    config: String,
}

// No async runtime here: setns() must not race with other threads.
fn main() -> Result<()> {
    init_stderr_logging()?;
    let args = ShimArgs::parse();
    let spec: NodeSpawnSpec =
        serde_json::from_str(&args.config).context("invalid --config JSON")?;

    require_network_capabilities()?;
    let nspawn = find_binary(NSPAWN)?;

    let (netns, result) = NetworkAttacher::new(&spec.cni_plugin_dir)
        .attach(&spec.machine)
        .with_context(|| format!("failed to attach network for {}", spec.machine))?;
    tracing::info!(
        node = %spec.machine,
        netns = %netns.path().display(),
        address = ?result.address(),
        "Network attached"
    );

    if let Err(e) = netns.enter() {
        let _ = netns.close();
        return Err(e.into());
    }

    let nspawn_args = spec.nspawn_args();
    tracing::info!(node = %spec.machine, args = ?nspawn_args, "Starting systemd-nspawn");
    let err = Command::new(&nspawn).args(&nspawn_args).exec();
    Err(anyhow!("failed to exec {}: {}", nspawn.display(), err))
}
