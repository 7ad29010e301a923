//! Backend process ownership
//!
//! The supervisor spawns the backend as a child process, owns its stdio,
//! scans the boot log for the readiness line, and executes console
//! commands. It never makes lifecycle decisions: it reports readiness and
//! exit, and it is the only writer of the `Starting` and `Online` states.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::LifecycleError;
use crate::stats::{StatsRegistry, Status};

/// Everything owned for one backend process incarnation
struct BackendHandle {
    pid: u32,
    stdin: ChildStdin,
    ready_rx: watch::Receiver<bool>,
    exit_rx: watch::Receiver<Option<i32>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// Owns the backend OS process between launch and exit
pub struct ProcessSupervisor {
    config: Arc<Config>,
    stats: Arc<StatsRegistry>,
    inner: Mutex<Option<BackendHandle>>,
}

impl ProcessSupervisor {
    pub fn new(config: Arc<Config>, stats: Arc<StatsRegistry>) -> Self {
        Self {
            config,
            stats,
            inner: Mutex::new(None),
        }
    }

    /// Spawn the backend per config, pipe its stdio and start the log
    /// scanner and exit waiter. Publishes `Starting`. Idempotent: if a
    /// process is already attached, its exit channel is returned as-is.
    pub async fn launch(&self) -> Result<watch::Receiver<Option<i32>>, LifecycleError> {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.as_ref() {
            debug!("backend already attached (pid {})", handle.pid);
            return Ok(handle.exit_rx.clone());
        }

        let backend = &self.config.backend;
        info!(
            "launching backend: {} {} (cwd: {})",
            backend.command,
            backend.args.join(" "),
            backend.working_dir
        );

        let mut child = Command::new(&backend.command)
            .args(&backend.args)
            .current_dir(&backend.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LifecycleError::Spawn {
                reason: e.to_string(),
            })?;

        let pid = child.id().unwrap_or(0);
        let stdin = child.stdin.take().ok_or_else(|| LifecycleError::Spawn {
            reason: "stdin pipe missing".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| LifecycleError::Spawn {
            reason: "stdout pipe missing".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| LifecycleError::Spawn {
            reason: "stderr pipe missing".to_string(),
        })?;

        self.stats.set_status(Status::Starting);
        self.stats.set_load_progress("0%");

        let (ready_tx, ready_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(scan_stdout(stdout, ready_tx, Arc::clone(&self.stats)));
        tokio::spawn(scan_stderr(stderr));
        tokio::spawn(wait_for_exit(child, exit_tx, kill_rx, pid));

        info!("backend process spawned (pid {pid})");
        *inner = Some(BackendHandle {
            pid,
            stdin,
            ready_rx: ready_rx.clone(),
            exit_rx: exit_rx.clone(),
            kill_tx: Some(kill_tx),
        });
        Ok(exit_rx)
    }

    /// Block until the readiness line is observed or `timeout` elapses.
    /// Publishes `Online` on success; latches the failure otherwise.
    pub async fn await_ready(&self, timeout: Duration) -> Result<(), LifecycleError> {
        let (mut ready_rx, mut exit_rx) = {
            let inner = self.inner.lock().await;
            let handle = inner.as_ref().ok_or_else(|| LifecycleError::Crash {
                detail: "backend process is gone".to_string(),
            })?;
            (handle.ready_rx.clone(), handle.exit_rx.clone())
        };

        tokio::select! {
            ready = ready_rx.wait_for(|ready| *ready) => match ready {
                Ok(_) => {
                    self.stats.set_status(Status::Online);
                    self.stats.set_load_progress("complete");
                    info!("backend is online");
                    Ok(())
                }
                Err(_) => {
                    let err = LifecycleError::Crash {
                        detail: "log stream closed before readiness".to_string(),
                    };
                    self.stats.latch_major_error(err.clone());
                    Err(err)
                }
            },
            exit = exit_rx.wait_for(|exit| exit.is_some()) => {
                let detail = match exit {
                    Ok(code) => format!("exit code {}", code.unwrap_or(-1)),
                    Err(_) => "exit status lost".to_string(),
                };
                let err = LifecycleError::Crash { detail };
                self.stats.latch_major_error(err.clone());
                Err(err)
            },
            _ = tokio::time::sleep(timeout) => {
                let err = LifecycleError::ReadyTimeout {
                    timeout_secs: timeout.as_secs(),
                };
                self.stats.latch_major_error(err.clone());
                Err(err)
            }
        }
    }

    /// Write one line to the backend's console (stdin)
    pub async fn command(&self, line: &str) -> Result<(), LifecycleError> {
        let mut inner = self.inner.lock().await;
        let handle = inner.as_mut().ok_or_else(|| LifecycleError::Console {
            reason: "no backend process".to_string(),
        })?;

        debug!("console <- {line}");
        let payload = format!("{line}\n");
        handle
            .stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| LifecycleError::Console {
                reason: e.to_string(),
            })?;
        handle.stdin.flush().await.map_err(|e| LifecycleError::Console {
            reason: e.to_string(),
        })
    }

    /// PID of the attached backend root process, if any
    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.as_ref().map(|handle| handle.pid)
    }

    /// Subscribe to the attached backend's exit notification
    pub async fn exit_receiver(&self) -> Option<watch::Receiver<Option<i32>>> {
        self.inner
            .lock()
            .await
            .as_ref()
            .map(|handle| handle.exit_rx.clone())
    }

    /// Escalate to SIGKILL after a graceful stop went unanswered
    pub async fn force_kill(&self) {
        if let Some(handle) = self.inner.lock().await.as_mut() {
            if let Some(kill_tx) = handle.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
    }

    /// Drop the handle of an exited backend so a later launch starts fresh
    pub async fn clear(&self) {
        *self.inner.lock().await = None;
    }
}

/// Scan the backend's boot log: update the load progress and flip the
/// readiness flag when the "Done ( ... )!" line appears.
async fn scan_stdout(stdout: ChildStdout, ready_tx: watch::Sender<bool>, stats: Arc<StatsRegistry>) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "backend", "{line}");
        if let Some(progress) = parse_spawn_progress(&line) {
            stats.set_load_progress(&progress);
        }
        if is_ready_line(&line) {
            info!("backend readiness line observed");
            ready_tx.send_replace(true);
        }
    }
}

async fn scan_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(target: "backend", "{line}");
    }
}

/// Wait for the backend to exit, escalating to a kill when asked
async fn wait_for_exit(
    mut child: Child,
    exit_tx: watch::Sender<Option<i32>>,
    mut kill_rx: oneshot::Receiver<()>,
    pid: u32,
) {
    let mut killed = false;
    loop {
        if killed {
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    warn!("waiting for killed backend {pid} failed: {e}");
                    -1
                }
            };
            exit_tx.send_replace(Some(code));
            return;
        }
        tokio::select! {
            status = child.wait() => {
                let code = match status {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(_) => -1,
                };
                info!("backend process {pid} exited with code {code}");
                exit_tx.send_replace(Some(code));
                return;
            }
            _ = &mut kill_rx => {
                killed = true;
                warn!("force killing backend process {pid}");
                let _ = child.start_kill();
            }
        }
    }
}

fn is_ready_line(line: &str) -> bool {
    match line.find("Done (") {
        Some(idx) => line[idx..].contains(")!"),
        None => false,
    }
}

fn parse_spawn_progress(line: &str) -> Option<String> {
    line.split("Preparing spawn area:")
        .nth(1)
        .map(|rest| rest.trim().to_string())
        .filter(|progress| !progress.is_empty())
}
