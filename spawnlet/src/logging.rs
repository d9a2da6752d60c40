//! Tracing setup for the CLI and the node-start shim.

use crate::cluster::SpawnletOptions;
use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_FILE_PREFIX: &str = "spawnlet.log";

/// Keeps the non-blocking file writer flushing until exit.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to stderr and to a daily file under `<home>/logs`.
///
/// Filter defaults to `info` and honours `RUST_LOG`. Calling it again is a no-op.
pub fn init_logging(options: &SpawnletOptions) -> SpawnletResult<()> {
    if FILE_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = options.logs_dir();
    std::fs::create_dir_all(&logs_dir).map_err(|e| {
        SpawnletError::Storage(format!("failed to create {}: {}", logs_dir.display(), e))
    })?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| SpawnletError::Internal(format!("failed to install logger: {}", e)))?;

    let _ = FILE_GUARD.set(guard);
    Ok(())
}

/// Stderr only. The shim runs under systemd, which collects stderr in the journal.
pub fn init_stderr_logging() -> SpawnletResult<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .try_init()
        .map_err(|e| SpawnletError::Internal(format!("failed to install logger: {}", e)))
}
