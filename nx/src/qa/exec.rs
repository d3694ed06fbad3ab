//! Shared command execution for QA runners

use std::path::Path;
use std::time::Duration;

/// Output of an external tool run
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Combined output, stdout first
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Run a shell command in `cwd` with a hard timeout. The child is killed
/// when the timeout fires; the result then reports `timed_out`.
pub async fn run_command(command: &str, cwd: &Path, timeout: Duration) -> CommandOutput {
    let start = std::time::Instant::now();

    let result = tokio::time::timeout(
        timeout,
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(output)) => CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            timed_out: false,
        },
        Ok(Err(e)) => CommandOutput {
            exit_code: -1,
            stdout: String::new(),
            stderr: e.to_string(),
            duration_ms,
            timed_out: false,
        },
        Err(_) => CommandOutput {
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("timed out after {timeout:?}"),
            duration_ms,
            timed_out: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_command_success() {
        let dir = tempdir().unwrap();
        let out = run_command("echo ok", dir.path(), Duration::from_secs(10)).await;
        assert!(out.passed());
        assert!(out.stdout.contains("ok"));
    }

    #[tokio::test]
    async fn test_run_command_failure() {
        let dir = tempdir().unwrap();
        let out = run_command("exit 3", dir.path(), Duration::from_secs(10)).await;
        assert_eq!(out.exit_code, 3);
        assert!(!out.passed());
    }

    #[tokio::test]
    async fn test_run_command_timeout_kills() {
        let dir = tempdir().unwrap();
        let out = run_command("sleep 5", dir.path(), Duration::from_millis(50)).await;
        assert!(out.timed_out);
        assert!(!out.passed());
        assert!(out.duration_ms < 2_000);
    }
}
