//! Backend lifecycle control
//!
//! The controller drives the backend between offline, starting, online,
//! stopping and suspended, sequencing the process supervisor and the OS
//! suspend machinery under one internal mutex:
//!
//! ```text
//! Offline   --warm-->            Starting --ready-->   Online
//! Online    --freeze_schedule--> Online   --(idle)-->  (freeze)
//! Online    --freeze(stop)-->    Stopping --exit-->    Offline
//! Online    --freeze(suspend)--> Suspended
//! Suspended --warm-->            Online   (OS resume only)
//! any       --backend crash-->   Offline  (major error latched)
//! ```
//!
//! Every status transition is serialized by the mutex; readiness waits
//! happen outside it, with waiters parked on the status watch channel.

mod os_control;
mod supervisor;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::timeout::{KILL_WAIT, STOP_GRACE};
use crate::error::LifecycleError;
use crate::stats::{StatsRegistry, Status};

pub(crate) use os_control::process_tree;
pub use supervisor::ProcessSupervisor;

/// The lifecycle state machine.
///
/// `warm` is idempotent and safe to call from any number of client tasks;
/// exactly one of them performs the actual cold start. `freeze_schedule`
/// arms a debounced idle timer that `warm` rescinds.
pub struct LifecycleController {
    config: Arc<Config>,
    stats: Arc<StatsRegistry>,
    supervisor: ProcessSupervisor,
    /// Serializes every status transition
    gate: Mutex<()>,
    /// Generation of the armed idle-freeze timer; bumping it rescinds
    /// whatever single-shot timer is currently in flight
    freeze_generation: AtomicU64,
}

impl LifecycleController {
    pub fn new(config: Arc<Config>, stats: Arc<StatsRegistry>) -> Arc<Self> {
        Arc::new(Self {
            supervisor: ProcessSupervisor::new(Arc::clone(&config), Arc::clone(&stats)),
            config,
            stats,
            gate: Mutex::new(()),
            freeze_generation: AtomicU64::new(0),
        })
    }

    /// Bring the backend online from whatever state it is in.
    ///
    /// Returns once the backend is online with its process tree resumed.
    /// Concurrent calls against an offline backend produce exactly one
    /// launch; the rest wait for readiness on the status channel. A call
    /// racing a graceful stop waits for the stop to finish, then
    /// relaunches. Success clears the latched major error.
    pub async fn warm(self: &Arc<Self>) -> Result<(), LifecycleError> {
        loop {
            let guard = self.gate.lock().await;
            self.rescind_freeze();

            match self.stats.status() {
                Status::Online => {
                    self.stats.clear_major_error();
                    drop(guard);
                    self.schedule_freeze_check();
                    return Ok(());
                }

                Status::Suspended => match self.supervisor.pid().await {
                    Some(pid) => {
                        let resumed = os_control::resume_tree(pid);
                        if resumed == 0 {
                            warn!("resume found no processes; backend presumed dead");
                            self.supervisor.clear().await;
                            self.stats.set_status(Status::Offline);
                            drop(guard);
                            continue;
                        }
                        info!("backend resumed ({resumed} processes)");
                        self.stats.set_status(Status::Online);
                        self.stats.clear_major_error();
                        drop(guard);
                        self.schedule_freeze_check();
                        return Ok(());
                    }
                    None => {
                        // suspended with no attached process: stale state
                        self.stats.set_status(Status::Offline);
                        drop(guard);
                        continue;
                    }
                },

                Status::Offline => {
                    let exit_rx = match self.supervisor.launch().await {
                        Ok(exit_rx) => exit_rx,
                        Err(e) => {
                            self.stats.latch_major_error(e.clone());
                            return Err(e);
                        }
                    };
                    self.spawn_exit_monitor(exit_rx);
                    // readiness can take minutes; waiters queue on the
                    // status channel, not on the gate
                    drop(guard);

                    self.supervisor
                        .await_ready(self.config.ready_timeout())
                        .await?;
                    self.stats.clear_major_error();
                    self.schedule_freeze_check();
                    return Ok(());
                }

                Status::Starting => {
                    // someone else launched; join the readiness wait (it
                    // is idempotent) so a crash surfaces here instead of
                    // triggering a relaunch
                    drop(guard);
                    self.supervisor
                        .await_ready(self.config.ready_timeout())
                        .await?;
                    self.stats.clear_major_error();
                    self.schedule_freeze_check();
                    return Ok(());
                }

                Status::Stopping => {
                    drop(guard);
                    self.wait_status_change(Status::Stopping).await;
                }
            }
        }
    }

    /// Arm (or re-arm) the idle-freeze timer
    pub fn freeze_schedule(self: &Arc<Self>) {
        self.schedule_freeze_check();
    }

    /// Remove the backend's CPU cost now: suspend the process tree when
    /// allowed, otherwise stop the backend gracefully. A no-op unless the
    /// backend is online.
    pub async fn freeze(self: &Arc<Self>) -> Result<(), LifecycleError> {
        let _guard = self.gate.lock().await;
        self.freeze_locked().await
    }

    /// `Ok` iff the backend is online and running; gates interactive
    /// operations such as console messages
    pub fn check_warm(&self) -> Result<(), LifecycleError> {
        match self.stats.status() {
            Status::Online => Ok(()),
            status => Err(LifecycleError::NotReady { status }),
        }
    }

    /// Print a message on the backend's in-game chat via its console
    pub async fn tell_raw(&self, message: &str) -> Result<(), LifecycleError> {
        self.check_warm()?;
        let payload = serde_json::json!({ "text": message });
        self.supervisor
            .command(&format!("tellraw @a {payload}"))
            .await
    }

    /// PID of the backend root process, if one is attached
    pub async fn backend_pid(&self) -> Option<u32> {
        self.supervisor.pid().await
    }

    /// Stop the backend for proxy shutdown, resuming a suspended tree
    /// first so the stop command can be processed
    pub async fn shutdown(self: &Arc<Self>) {
        let _guard = self.gate.lock().await;
        self.rescind_freeze();
        match self.stats.status() {
            Status::Suspended => {
                if let Some(pid) = self.supervisor.pid().await {
                    os_control::resume_tree(pid);
                }
                self.stats.set_status(Status::Online);
                let _ = self.stop_backend().await;
            }
            Status::Online | Status::Starting => {
                let _ = self.stop_backend().await;
            }
            Status::Offline | Status::Stopping => {}
        }
    }

    async fn freeze_locked(&self) -> Result<(), LifecycleError> {
        if self.stats.status() != Status::Online {
            debug!("freeze skipped (status: {})", self.stats.status());
            return Ok(());
        }

        if self.config.hibernation.allow_suspend {
            if let Some(pid) = self.supervisor.pid().await {
                let suspended = os_control::suspend_tree(pid);
                if suspended > 0 {
                    info!("backend suspended ({suspended} processes)");
                    self.stats.set_status(Status::Suspended);
                    return Ok(());
                }
                warn!("suspend found no processes, stopping instead");
            }
        }
        self.stop_backend().await
    }

    /// Graceful-stop path: console `stop`, bounded wait, kill escalation
    async fn stop_backend(&self) -> Result<(), LifecycleError> {
        self.stats.set_status(Status::Stopping);
        info!("issuing graceful stop");

        if let Err(e) = self.supervisor.command("stop").await {
            warn!("stop command failed: {e}");
            self.supervisor.force_kill().await;
        }

        if let Some(mut exit_rx) = self.supervisor.exit_receiver().await {
            let timed_out = tokio::time::timeout(
                STOP_GRACE,
                exit_rx.wait_for(|exit| exit.is_some()),
            )
            .await
            .is_err();
            if timed_out {
                warn!("backend ignored stop for {STOP_GRACE:?}, killing");
                self.supervisor.force_kill().await;
                let _ =
                    tokio::time::timeout(KILL_WAIT, exit_rx.wait_for(|exit| exit.is_some())).await;
            }
        }

        self.supervisor.clear().await;
        self.stats.set_status(Status::Offline);
        info!("backend is offline");
        Ok(())
    }

    /// Single-shot, generation-checked idle timer. Firing checks the
    /// generation, the connection count and the status under the gate, so
    /// a rescinded or superseded timer is a silent no-op.
    fn schedule_freeze_check(self: &Arc<Self>) {
        let generation = self.freeze_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let idle = self.config.suspend_refresh();
        debug!("idle freeze armed in {idle:?} (generation {generation})");

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if controller.freeze_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let _guard = controller.gate.lock().await;
            if controller.freeze_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if controller.stats.conn_count() != 0
                || controller.stats.status() != Status::Online
            {
                return;
            }
            info!("idle period elapsed with no connections, freezing backend");
            if let Err(e) = controller.freeze_locked().await {
                warn!("idle freeze failed: {e}");
            }
        });
    }

    fn rescind_freeze(&self) {
        self.freeze_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Observe backend exit. A stop-path exit is expected; anything else
    /// latches a crash so clients stop poking the backend.
    fn spawn_exit_monitor(self: &Arc<Self>, mut exit_rx: watch::Receiver<Option<i32>>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let code = match exit_rx.wait_for(|exit| exit.is_some()).await {
                Ok(code) => code.unwrap_or(-1),
                Err(_) => -1,
            };
            let _guard = controller.gate.lock().await;
            match controller.stats.status() {
                // the stop path owns these transitions
                Status::Stopping | Status::Offline => {}
                status => {
                    warn!("backend exited unexpectedly with code {code} (status was {status})");
                    controller.stats.latch_major_error(LifecycleError::Crash {
                        detail: format!("exit code {code}"),
                    });
                    controller.supervisor.clear().await;
                    controller.stats.set_status(Status::Offline);
                }
            }
        });
    }

    async fn wait_status_change(&self, from: Status) {
        let mut rx = self.stats.subscribe();
        let _ = rx.wait_for(|status| *status != from).await;
    }
}
