//! Process-wide mutable state shared by every subsystem
//!
//! A single registry holds the backend status, the count of active join
//! proxy pairs, the rolling byte counters and the latched major error.
//! All of it sits behind one mutex; the lock is a leaf and is never held
//! across I/O or across the lifecycle controller's own mutex.

use std::fmt;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::error::LifecycleError;

/// Authoritative lifecycle state of the managed backend.
///
/// This is the single source of truth; there is no separate "suspended"
/// flag. A suspended backend is `Suspended`, full stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No backend process exists
    Offline,
    /// The backend process is booting, readiness line not yet seen
    Starting,
    /// The backend is running and serving
    Online,
    /// A graceful stop has been issued, waiting for exit
    Stopping,
    /// The backend process tree is OS-suspended
    Suspended,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Starting => "starting",
            Self::Online => "online",
            Self::Stopping => "stopping",
            Self::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

/// Relay direction, used to attribute transferred bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientToServer => "client --> server",
            Self::ServerToClient => "server --> client",
        }
    }
}

/// The record guarded by the registry lock.
///
/// `status` is only ever written through [`StatsRegistry::set_status`] so
/// transitions reach the watch channel; everything else may be updated
/// inside [`StatsRegistry::mutate`].
#[derive(Debug)]
pub struct Stats {
    pub status: Status,
    pub conn_count: i32,
    pub bytes_to_clients: f64,
    pub bytes_to_server: f64,
    pub load_progress: String,
    pub major_error: Option<LifecycleError>,
}

/// Shared registry of proxy-wide counters and the backend status.
///
/// Status transitions are serialized elsewhere (by the lifecycle
/// controller); the registry only publishes them, here and on a watch
/// channel so that waiters can block on a change.
#[derive(Debug)]
pub struct StatsRegistry {
    inner: Mutex<Stats>,
    status_tx: watch::Sender<Status>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(Status::Offline);
        Self {
            inner: Mutex::new(Stats {
                status: Status::Offline,
                conn_count: 0,
                bytes_to_clients: 0.0,
                bytes_to_server: 0.0,
                load_progress: String::new(),
                major_error: None,
            }),
            status_tx,
        }
    }

    /// Run `f` under the registry lock. The closure must not block.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut Stats) -> T) -> T {
        f(&mut self.inner.lock().unwrap())
    }

    pub fn status(&self) -> Status {
        self.mutate(|stats| stats.status)
    }

    /// Publish a status transition, waking any watch subscribers
    pub fn set_status(&self, status: Status) {
        self.mutate(|stats| stats.status = status);
        self.status_tx.send_replace(status);
    }

    /// Subscribe to status transitions
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    pub fn conn_count(&self) -> i32 {
        self.mutate(|stats| stats.conn_count)
    }

    /// Record a newly established join proxy pair, returning the new count
    pub fn conn_connected(&self) -> i32 {
        self.mutate(|stats| {
            stats.conn_count += 1;
            stats.conn_count
        })
    }

    /// Record a torn-down join proxy pair, returning the new count
    pub fn conn_disconnected(&self) -> i32 {
        self.mutate(|stats| {
            stats.conn_count -= 1;
            if stats.conn_count < 0 {
                // never expected; clamp rather than poison the freeze logic
                stats.conn_count = 0;
            }
            stats.conn_count
        })
    }

    pub fn add_bytes(&self, direction: Direction, n: usize) {
        self.mutate(|stats| match direction {
            Direction::ServerToClient => stats.bytes_to_clients += n as f64,
            Direction::ClientToServer => stats.bytes_to_server += n as f64,
        });
    }

    /// Drain the rolling byte counters, returning (to clients, to server)
    pub fn take_bytes(&self) -> (f64, f64) {
        self.mutate(|stats| {
            let taken = (stats.bytes_to_clients, stats.bytes_to_server);
            stats.bytes_to_clients = 0.0;
            stats.bytes_to_server = 0.0;
            taken
        })
    }

    pub fn load_progress(&self) -> String {
        self.mutate(|stats| stats.load_progress.clone())
    }

    pub fn set_load_progress(&self, progress: &str) {
        self.mutate(|stats| stats.load_progress = progress.to_string());
    }

    pub fn major_error(&self) -> Option<LifecycleError> {
        self.mutate(|stats| stats.major_error.clone())
    }

    /// Latch a major error. The first latched error wins; later ones are
    /// dropped so the operator sees the root cause, not the fallout.
    pub fn latch_major_error(&self, err: LifecycleError) {
        self.mutate(|stats| {
            if stats.major_error.is_none() {
                stats.major_error = Some(err);
            }
        });
    }

    /// Clear the latched major error (only a successful warm does this)
    pub fn clear_major_error(&self) {
        self.mutate(|stats| stats.major_error = None);
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
