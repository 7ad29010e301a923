//! Periodic telemetry printers
//!
//! Two optional background tasks: a once-per-second data-usage line while
//! traffic is flowing, and a resource-usage line sampling the backend
//! process tree. Both are plain log output driven by config flags.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::lifecycle::{process_tree, LifecycleController};
use crate::stats::StatsRegistry;

/// How often the backend's resource usage is sampled
const RESOURCE_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Print KB/s to clients and to the backend, resetting the counters every
/// second. Quiet while nothing is flowing.
pub fn spawn_data_usage_printer(
    stats: Arc<StatsRegistry>,
    config: Arc<Config>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if !config.proxy.show_internet_usage {
                continue;
            }
            let (to_clients, to_server) = stats.take_bytes();
            if to_clients != 0.0 || to_server != 0.0 {
                info!(
                    "data/s: {:8.3} KB/s to clients | {:8.3} KB/s to server",
                    to_clients / 1024.0,
                    to_server / 1024.0
                );
            }
        }
    })
}

/// Sampled usage of the backend process tree
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    /// Summed CPU percentage (can exceed 100 on multi-core)
    pub cpu_percent: f32,
    /// Summed resident memory in bytes
    pub memory_bytes: u64,
    /// Number of live processes in the tree
    pub process_count: usize,
}

/// Tracks CPU and memory of the backend process tree.
///
/// The first sample reports zero CPU; the percentage needs two refreshes.
pub struct ResourceMonitor {
    system: System,
    peak_cpu: f32,
    peak_memory: u64,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing().with_processes(ProcessRefreshKind::everything()),
            ),
            peak_cpu: 0.0,
            peak_memory: 0,
        }
    }

    /// Sample the tree rooted at `root`, updating the peaks
    pub fn sample(&mut self, root: u32) -> ResourceUsage {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let mut usage = ResourceUsage::default();
        for pid in process_tree(root) {
            if let Some(process) = self.system.process(sysinfo::Pid::from_u32(pid)) {
                usage.cpu_percent += process.cpu_usage();
                usage.memory_bytes += process.memory();
                usage.process_count += 1;
            }
        }

        self.peak_cpu = self.peak_cpu.max(usage.cpu_percent);
        self.peak_memory = self.peak_memory.max(usage.memory_bytes);
        usage
    }

    pub fn peaks(&self) -> (f32, u64) {
        (self.peak_cpu, self.peak_memory)
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Log the backend's CPU and memory every few seconds while it has a
/// process attached
pub fn spawn_resource_usage_printer(
    controller: Arc<LifecycleController>,
    config: Arc<Config>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = ResourceMonitor::new();
        let mut ticker = tokio::time::interval(RESOURCE_SAMPLE_INTERVAL);
        loop {
            ticker.tick().await;
            if !config.proxy.show_resource_usage {
                continue;
            }
            if let Some(pid) = controller.backend_pid().await {
                let usage = monitor.sample(pid);
                info!(
                    "backend usage: {:5.1}% CPU | {:7.1} MB | {} processes",
                    usage.cpu_percent,
                    usage.memory_bytes as f64 / (1024.0 * 1024.0),
                    usage.process_count
                );
            }
        }
    })
}
