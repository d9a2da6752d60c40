//! `spawnlet` command line.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use spawnlet::cluster::{BindSpec, ClusterSettings, ContainerRuntime, RuntimePaths};
use spawnlet::pipeline::PipelineMetrics;
use spawnlet::{ClusterOrchestrator, SpawnletOptions, init_logging};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spawnlet", version, about = "Ephemeral multi-node Kubernetes clusters on systemd-nspawn")]
struct Cli {
    /// State directory (default: $SPAWNLET_HOME or ~/.local/share/spawnlet)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prepare a new cluster directory
    Create(CreateArgs),
    /// Start nodes and bootstrap the control plane
    Start {
        name: String,
        #[arg(long, short = 'n', default_value_t = 3)]
        nodes: usize,
    },
    /// Stop all nodes of a cluster
    Stop {
        name: String,
        /// Terminate nodes that do not power off in time
        #[arg(long)]
        force: bool,
    },
    /// Stop a cluster and remove its directory
    Destroy { name: String },
    /// List clusters
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct CreateArgs {
    name: String,
    #[arg(long, default_value = "v1.9.6")]
    kubernetes_version: String,
    #[arg(long)]
    hyperkube_image: Option<String>,
    /// Local Kubernetes checkout; binaries are taken from `_output/bin`
    #[arg(long)]
    kubernetes_source_dir: Option<PathBuf>,
    #[arg(long, default_value = "docker")]
    container_runtime: ContainerRuntime,
    #[arg(long)]
    rkt_binary: Option<PathBuf>,
    #[arg(long)]
    rkt_stage1_image: Option<PathBuf>,
    #[arg(long)]
    crio_binary: Option<PathBuf>,
    #[arg(long)]
    runc_binary: Option<PathBuf>,
    #[arg(long)]
    conmon_binary: Option<PathBuf>,
    #[arg(long)]
    base_image: Option<String>,
    #[arg(long)]
    cni_plugin_dir: Option<PathBuf>,
    /// Holds `<version>/{kubeadm,kubelet,kubectl}`
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Read-write bind mount, `SOURCE:TARGET`
    #[arg(long = "bind", value_parser = parse_bind)]
    binds: Vec<BindSpec>,
    /// Read-only bind mount, `SOURCE:TARGET`
    #[arg(long = "bind-ro", value_parser = parse_bind)]
    binds_ro: Vec<BindSpec>,
    /// Cap on nodes provisioned at the same time
    #[arg(long)]
    max_parallel: Option<usize>,
    #[arg(long)]
    shutdown_timeout_secs: Option<u64>,
    #[arg(long)]
    shim_path: Option<PathBuf>,
}

fn parse_bind(value: &str) -> Result<BindSpec, String> {
    match value.split_once(':') {
        Some((source, target)) if !source.is_empty() && !target.is_empty() => {
            Ok(BindSpec::new(source, target))
        }
        _ => Err(format!("expected SOURCE:TARGET, got '{}'", value)),
    }
}

impl CreateArgs {
    fn into_settings(self) -> Result<ClusterSettings> {
        let cache_dir = match self.cache_dir {
            Some(dir) => dir,
            None => dirs::cache_dir()
                .map(|d| d.join("spawnlet"))
                .context("no cache directory; pass --cache-dir")?,
        };

        let mut settings = ClusterSettings::new(self.name, self.kubernetes_version, cache_dir);
        settings.hyperkube_image = self.hyperkube_image;
        settings.kubernetes_source_dir = self.kubernetes_source_dir;
        settings.container_runtime = self.container_runtime;
        settings.runtime_paths = RuntimePaths {
            rkt_binary: self.rkt_binary,
            rkt_stage1_image: self.rkt_stage1_image,
            crio_binary: self.crio_binary,
            runc_binary: self.runc_binary,
            conmon_binary: self.conmon_binary,
        };
        if let Some(image) = self.base_image {
            settings.base_image = image;
        }
        if let Some(dir) = self.cni_plugin_dir {
            settings.cni_plugin_dir = dir;
        }
        settings.binds = self.binds;
        settings
            .binds
            .extend(self.binds_ro.into_iter().map(BindSpec::read_only));
        settings.max_parallel = self.max_parallel;
        if let Some(secs) = self.shutdown_timeout_secs {
            settings.shutdown_timeout_secs = secs;
        }
        settings.shim_path = self.shim_path;
        Ok(settings)
    }
}

fn print_metrics(operation: &str, name: &str, metrics: &PipelineMetrics) {
    if metrics.stages.is_empty() {
        println!("{}: nothing to do for cluster {}", operation, name);
        return;
    }
    for stage in &metrics.stages {
        for task in &stage.tasks {
            println!("  {:<40} {:>8} ms", task.name, task.duration_ms);
        }
    }
    println!("{} {} finished in {} ms", operation, name, metrics.total_duration_ms);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let options = match cli.home {
        Some(home) => SpawnletOptions::new(home)?,
        None => {
            let options = SpawnletOptions::default();
            options.validate()?;
            options
        }
    };
    init_logging(&options)?;

    let orchestrator = ClusterOrchestrator::new(options);
    match cli.command {
        Command::Create(args) => {
            let cluster = orchestrator.create(args.into_settings()?).await?;
            println!(
                "created cluster {} at {}",
                cluster.name(),
                cluster.layout.dir().display()
            );
        }
        Command::Start { name, nodes } => {
            let metrics = orchestrator
                .start(&name, nodes)
                .await
                .with_context(|| format!("failed to start cluster {}", name))?;
            print_metrics("start", &name, &metrics);
            let cluster = orchestrator.load(&name)?;
            println!("kubeconfig: {}", cluster.layout.kubeconfig_path().display());
        }
        Command::Stop { name, force } => {
            let metrics = orchestrator
                .stop(&name, force)
                .await
                .with_context(|| format!("failed to stop cluster {}", name))?;
            print_metrics("stop", &name, &metrics);
        }
        Command::Destroy { name } => {
            orchestrator
                .destroy(&name)
                .await
                .with_context(|| format!("failed to destroy cluster {}", name))?;
            println!("destroyed cluster {}", name);
        }
        Command::List { json } => {
            let clusters = orchestrator.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&clusters)?);
            } else if clusters.is_empty() {
                println!("no clusters");
            } else {
                println!("{:<24} {:<18} {:<10} {:>7}", "NAME", "STATUS", "VERSION", "RUNNING");
                for c in clusters {
                    println!(
                        "{:<24} {:<18} {:<10} {:>3}/{:<3}",
                        c.name,
                        c.status.to_string(),
                        c.kubernetes_version,
                        c.running,
                        c.nodes
                    );
                }
            }
        }
    }

    Ok(())
}
