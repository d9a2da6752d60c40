//! External process execution with captured output.
//!
//! Every administrative tool invocation goes through `run_command`, which:
//! - captures stdout and stderr
//! - maps "No machine 'x' known" / "No image 'x' known" to `SpawnletError::NotFound`
//! - maps any other non-zero exit to `SpawnletError::Process` carrying the output

use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;
use tokio::process::Command;

static NOT_FOUND: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"No (machine|image) '([^']+)' known").expect("static regex is valid")
});

/// Captured result of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args...`, returning captured output on success.
pub async fn run_command<S: AsRef<str>>(program: &str, args: &[S]) -> SpawnletResult<CommandOutput> {
    let command_line = render_command_line(program, args);
    tracing::debug!(command = %command_line, "Running command");

    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(AsRef::as_ref))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| SpawnletError::Process {
        command: command_line.clone(),
        status: "spawn failed".to_string(),
        stdout: String::new(),
        stderr: e.to_string(),
    })?;

    let output = child.wait_with_output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        return Ok(CommandOutput { stdout, stderr });
    }

    Err(classify_failure(command_line, output.status, stdout, stderr))
}

fn classify_failure(
    command: String,
    status: ExitStatus,
    stdout: String,
    stderr: String,
) -> SpawnletError {
    if let Some(name) = not_found_target(&stderr).or_else(|| not_found_target(&stdout)) {
        tracing::debug!(command = %command, target = %name, "Target not found");
        return SpawnletError::NotFound(name);
    }

    SpawnletError::Process {
        command,
        status: status.to_string(),
        stdout,
        stderr,
    }
}

/// Extract the machine or image name from a "No machine 'x' known" message.
pub(crate) fn not_found_target(text: &str) -> Option<String> {
    NOT_FOUND
        .captures(text)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().to_string())
}

fn render_command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_target() {
        assert_eq!(
            not_found_target("Could not kill machine: No machine 'demo-master-abc123' known"),
            Some("demo-master-abc123".to_string())
        );
        assert_eq!(
            not_found_target("No image 'demo-worker-x' known\n"),
            Some("demo-worker-x".to_string())
        );
        assert_eq!(not_found_target("Failed to connect to bus"), None);
    }

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let output = run_command("sh", &["-c", "echo hello; echo oops >&2"])
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_run_command_failure_carries_output() {
        let err = run_command("sh", &["-c", "echo partial; echo broken >&2; exit 3"])
            .await
            .unwrap_err();

        let (stdout, stderr) = err.process_output().unwrap();
        assert_eq!(stdout.trim(), "partial");
        assert_eq!(stderr.trim(), "broken");
    }

    #[tokio::test]
    async fn test_run_command_not_found_is_distinguished() {
        let err = run_command("sh", &["-c", "echo \"No machine 'gone' known\" >&2; exit 1"])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: gone");
    }
}
