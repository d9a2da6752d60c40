//! Error taxonomy for cluster lifecycle operations.
//!
//! Variants map onto the failure classes the orchestrator distinguishes:
//! - `Config`: validation failed before any side effect
//! - `Storage` / `Template`: resource preparation failed, Create is aborted
//! - `Process`: an external command exited unsuccessfully
//! - `NotFound`: the target machine or image is already gone
//! - `Timeout`: a node never reached the running state
//! - `Aggregate`: one or more independent per-node tasks failed

use std::fmt;

use thiserror::Error;

pub type SpawnletResult<T> = Result<T, SpawnletError>;

#[derive(Debug, Error)]
pub enum SpawnletError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("command `{command}` failed ({status}): {}", summarize_output(.stdout, .stderr))]
    Process {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{operation} failed for {} task(s): {}", .failures.len(), join_failures(.failures))]
    Aggregate {
        operation: String,
        failures: Vec<TaskFailure>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SpawnletError {
    /// True for "machine/image does not exist" conditions, which stop and
    /// remove paths treat as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SpawnletError::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SpawnletError::Timeout(_))
    }

    /// Captured output of the failed external command, if any.
    pub fn process_output(&self) -> Option<(&str, &str)> {
        match self {
            SpawnletError::Process { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }
}

/// One failed task inside a fan-out stage.
#[derive(Debug)]
pub struct TaskFailure {
    pub index: usize,
    pub task: String,
    pub error: SpawnletError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.index, self.task, self.error)
    }
}

fn join_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn summarize_output(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    let stdout = stdout.trim();
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => "no output".to_string(),
        (true, false) => format!("stderr: {}", stderr),
        (false, true) => format!("stdout: {}", stdout),
        (false, false) => format!("stderr: {}; stdout: {}", stderr, stdout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_includes_output() {
        let err = SpawnletError::Process {
            command: "machinectl poweroff demo".into(),
            status: "exit status: 1".into(),
            stdout: String::new(),
            stderr: "Could not power off\n".into(),
        };

        let msg = err.to_string();
        assert!(msg.contains("machinectl poweroff demo"));
        assert!(msg.contains("stderr: Could not power off"));
        assert_eq!(err.process_output(), Some(("", "Could not power off\n")));
    }

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = SpawnletError::Aggregate {
            operation: "start".into(),
            failures: vec![
                TaskFailure {
                    index: 1,
                    task: "launch demo-worker-a".into(),
                    error: SpawnletError::Timeout("node did not start".into()),
                },
                TaskFailure {
                    index: 2,
                    task: "launch demo-worker-b".into(),
                    error: SpawnletError::NotFound("demo-worker-b".into()),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.starts_with("start failed for 2 task(s)"));
        assert!(msg.contains("[1] launch demo-worker-a"));
        assert!(msg.contains("[2] launch demo-worker-b"));
    }

    #[test]
    fn test_not_found_classification() {
        assert!(SpawnletError::NotFound("x".into()).is_not_found());
        assert!(!SpawnletError::Internal("x".into()).is_not_found());
        assert!(SpawnletError::Timeout("x".into()).is_timeout());
    }
}
