//! Per-process resource sampling.
//!
//! CPU is measured as the delta between two refreshes, so the first
//! sample always reads zero. It is divided by the number of cores to
//! land in 0–100 for the whole machine, the same scale as memory.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::time::Instant;
use tracing::debug;

use forkgrid_core::WorkerMessage;

/// One reading of this process's resource usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Percent of total machine CPU.
    pub cpu_usage: f64,
    /// Percent of total system memory.
    pub memory_usage: f64,
    pub memory_bytes: u64,
    /// Seconds since the sampler was created.
    pub uptime: f64,
}

impl ResourceSample {
    pub fn into_message(self) -> WorkerMessage {
        WorkerMessage::WorkerMetrics {
            cpu_usage: self.cpu_usage,
            memory_usage: self.memory_usage,
            memory_bytes: self.memory_bytes,
            uptime: self.uptime,
        }
    }
}

pub struct ResourceSampler {
    system: System,
    pid: Pid,
    cores: f64,
    started: Instant,
}

impl ResourceSampler {
    /// Sample the current process.
    pub fn new() -> Self {
        Self::for_pid(std::process::id())
    }

    pub fn for_pid(pid: u32) -> Self {
        let pid = Pid::from_u32(pid);
        let mut system = System::new_with_specifics(RefreshKind::new().with_memory(
            sysinfo::MemoryRefreshKind::new().with_ram(),
        ));
        // Prime the CPU counters so the next refresh has a baseline.
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(1.0);
        Self {
            system,
            pid,
            cores,
            started: Instant::now(),
        }
    }

    pub fn sample(&mut self) -> ResourceSample {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        let total_memory = self.system.total_memory();
        let uptime = self.started.elapsed().as_secs_f64();

        let Some(process) = self.system.process(self.pid) else {
            debug!(pid = %self.pid, "process not found while sampling");
            return ResourceSample {
                cpu_usage: 0.0,
                memory_usage: 0.0,
                memory_bytes: 0,
                uptime,
            };
        };

        let memory_bytes = process.memory();
        let memory_usage = if total_memory > 0 {
            memory_bytes as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };
        let cpu_usage = (process.cpu_usage() as f64 / self.cores).clamp(0.0, 100.0);

        ResourceSample {
            cpu_usage,
            memory_usage,
            memory_bytes,
            uptime,
        }
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}
