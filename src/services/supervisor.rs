use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use sysinfo::{Pid, Signal, System};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument, warn};

const GRACEFUL_STOP_WINDOW: Duration = Duration::from_secs(3);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    pub is_running: bool,
    pub pid: Option<u32>,
}

#[derive(Debug)]
struct TrackedProcess {
    pid: u32,
    script_path: PathBuf,
    started_at: DateTime<Utc>,
    exit_code: Arc<Mutex<Option<i32>>>,
    exit_notify: Arc<Notify>,
}

/// Supervises at most one externally spawned script process. The single
/// optional slot makes the one-process-at-a-time constraint explicit; the
/// stop path and the process's own exit event both converge on clearing it,
/// and clearing an already-empty slot is a no-op.
pub struct ProcessSupervisor {
    slot: Arc<Mutex<Option<TrackedProcess>>>,
}

/// Scripts run through the virtual-environment interpreter that lives next
/// to them.
pub(crate) fn venv_interpreter(script_path: &Path) -> PathBuf {
    let script_dir = script_path.parent().unwrap_or_else(|| Path::new("."));
    script_dir.join("venv").join("bin").join("python")
}

fn send_signal(pid: u32, signal: Signal) -> Option<bool> {
    let mut system = System::new();
    system.refresh_processes();
    system
        .process(Pid::from_u32(pid))
        .and_then(|process| process.kill_with(signal))
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    #[instrument(skip(self), fields(script = %script_path.display()))]
    pub async fn start(&self, script_path: &Path) -> Result<u32, AppError> {
        let mut slot = self.slot.lock().await;

        if let Some(tracked) = slot.as_ref() {
            if tracked.exit_code.lock().await.is_none() {
                return Err(AppError::AlreadyRunning);
            }
            debug!(pid = tracked.pid, started_at = %tracked.started_at, "Discarding stale process record");
        }
        *slot = None;

        let script_dir = script_path.parent().unwrap_or_else(|| Path::new("."));
        let interpreter = venv_interpreter(script_path);
        debug!(interpreter = %interpreter.display(), "Spawning script");

        let mut child = Command::new(&interpreter)
            .arg(script_path)
            .current_dir(script_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!(error = %e, "Failed to spawn script");
                AppError::SpawnError(e.to_string())
            })?;

        let pid = child
            .id()
            .ok_or_else(|| AppError::SpawnError("process exited before a pid was assigned".into()))?;

        let exit_code = Arc::new(Mutex::new(None::<i32>));
        let exit_notify = Arc::new(Notify::new());

        *slot = Some(TrackedProcess {
            pid,
            script_path: script_path.to_path_buf(),
            started_at: Utc::now(),
            exit_code: exit_code.clone(),
            exit_notify: exit_notify.clone(),
        });

        // Output is captured for logging only, never returned to callers.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(pid, stream = "stdout", "{}", line);
                }
            }
        });
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(pid, stream = "stderr", "{}", line);
                }
            }
        });

        let slot_handle = self.slot.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let _ = tokio::join!(stdout_task, stderr_task);

            match status {
                Ok(status) => {
                    info!(pid, code = ?status.code(), "Process exited");
                    *exit_code.lock().await = Some(status.code().unwrap_or(-1));
                }
                Err(e) => {
                    // Post-spawn failures are only logged; clients observe
                    // them through the next status poll.
                    error!(pid, error = %e, "Failed to wait on process");
                    *exit_code.lock().await = Some(-1);
                }
            }
            exit_notify.notify_waiters();

            let mut slot = slot_handle.lock().await;
            if slot.as_ref().map(|t| t.pid) == Some(pid) {
                *slot = None;
            }
        });

        info!(pid, "Process started");
        Ok(pid)
    }

    #[instrument(skip(self))]
    pub async fn stop(&self, pid: u32) -> Result<(), AppError> {
        let exit_notify = {
            let mut slot = self.slot.lock().await;
            let (notify, script) = match slot.as_ref() {
                Some(tracked) if tracked.pid == pid => (
                    tracked.exit_notify.clone(),
                    tracked.script_path.display().to_string(),
                ),
                _ => return Err(AppError::ProcessNotFound),
            };

            match send_signal(pid, Signal::Term) {
                // None: the pid is already gone from the process table; the
                // exit event will clean the slot up.
                Some(true) | None => notify,
                Some(false) => {
                    // Drop the record rather than leave a permanently stuck
                    // entry behind.
                    warn!(pid, script = %script, "Failed to deliver SIGTERM, discarding record");
                    *slot = None;
                    return Err(AppError::SignalError(
                        "could not deliver termination signal".into(),
                    ));
                }
            }
        };

        // Escalate to SIGKILL unless the exit event lands first.
        tokio::spawn(async move {
            tokio::select! {
                _ = exit_notify.notified() => {
                    debug!(pid, "Process exited within the graceful stop window");
                }
                _ = sleep(GRACEFUL_STOP_WINDOW) => {
                    warn!(pid, "Process did not exit after SIGTERM, sending SIGKILL");
                    send_signal(pid, Signal::Kill);
                }
            }
        });

        info!(pid, "Stop signal sent");
        Ok(())
    }

    pub async fn status(&self) -> ProcessStatus {
        let mut slot = self.slot.lock().await;

        let live_pid = match slot.as_ref() {
            Some(tracked) => {
                if tracked.exit_code.lock().await.is_none() {
                    Some(tracked.pid)
                } else {
                    None
                }
            }
            None => {
                return ProcessStatus {
                    is_running: false,
                    pid: None,
                }
            }
        };

        match live_pid {
            Some(pid) => ProcessStatus {
                is_running: true,
                pid: Some(pid),
            },
            None => {
                // Stale record: the exit event fired but the slot was not
                // cleared yet.
                *slot = None;
                ProcessStatus {
                    is_running: false,
                    pid: None,
                }
            }
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
