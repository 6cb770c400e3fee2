use crate::config::Config;
use crate::error::AppError;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument, warn};

/// Runs one-shot shell commands inside the configured workspace directory,
/// with its virtualenv activated. Output is returned to the caller; the
/// command is bounded by the configured timeout.
pub struct CommandRunner {
    config: Arc<Config>,
}

fn is_command_blocked(command_str: &str, config: &Config) -> bool {
    let effective_command = command_str
        .trim_start()
        .split_whitespace()
        .find(|s| !s.contains('=')) // Skip leading VAR=val assignments
        .unwrap_or("");

    config
        .blocked_commands
        .iter()
        .any(|regex| regex.is_match(effective_command))
}

impl CommandRunner {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    #[instrument(skip(self, command))]
    pub async fn run(&self, command: &str) -> Result<String, AppError> {
        if command.trim().is_empty() {
            return Err(AppError::MissingField("Command"));
        }
        if is_command_blocked(command, &self.config) {
            warn!(command, "Command execution blocked");
            return Err(AppError::CommandBlocked(command.to_string()));
        }

        let workspace = self.config.command_dir.as_ref().ok_or_else(|| {
            AppError::CommandExecutionError("COMMAND_DIR is not configured".to_string())
        })?;

        // The virtualenv activation mirrors how the dashboard's scripts are
        // meant to be run by hand.
        let full_command = format!(
            "cd \"{}\" && if [ -f venv/bin/activate ]; then . venv/bin/activate; fi && {}",
            workspace.display(),
            command
        );
        debug!(command = %full_command, "Executing one-shot command");

        let child = Command::new("/bin/bash")
            .arg("-c")
            .arg(&full_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out command must not keep running once its future is
            // dropped.
            .kill_on_drop(true)
            .output();

        let output = timeout(Duration::from_millis(self.config.command_timeout_ms), child)
            .await
            .map_err(|_| AppError::TimeoutError(format!("command '{}' timed out", command)))?
            .map_err(|e| AppError::CommandExecutionError(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !stderr.is_empty() {
            warn!(command, stderr = %stderr, "Command produced stderr output");
        }

        if !stdout.is_empty() {
            Ok(stdout)
        } else if !stderr.is_empty() {
            Ok(stderr)
        } else {
            Ok("No output from command".to_string())
        }
    }
}
