//! Domain types shared by the master and its subsystems.
//!
//! Worker records and stats live in the master's event loop and are
//! mutated only there. The report types are the read-only projection
//! published to the HTTP surface and the load balancer.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Identifier of a worker process, unique for the lifetime of the master.
pub type WorkerId = u32;

// ── Worker lifecycle ──────────────────────────────────────────────

/// Lifecycle status of a worker. Only ever advances in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Online,
    Draining,
    Dead,
}

impl WorkerStatus {
    /// Starting and Online workers count towards the pool size.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Online)
    }

    /// Whether `next` is a forward transition from `self`.
    pub fn can_advance_to(self, next: WorkerStatus) -> bool {
        next > self
    }
}

/// Book-keeping for one forked worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub id: WorkerId,
    /// OS process id, if the spawner exposes one.
    pub pid: Option<u32>,
    /// Unix timestamp (milliseconds) of the fork.
    pub started_at: u64,
    /// Restarts in the lineage this worker replaced.
    pub restart_count: u32,
    pub status: WorkerStatus,
}

impl WorkerRecord {
    pub fn new(id: WorkerId, pid: Option<u32>, restart_count: u32) -> Self {
        Self {
            id,
            pid,
            started_at: epoch_millis(),
            restart_count,
            status: WorkerStatus::Starting,
        }
    }

    /// Move to `next` if it is a forward transition.
    ///
    /// Returns `false` and leaves the status untouched otherwise.
    pub fn advance(&mut self, next: WorkerStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

/// How a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerExit {
    /// Exited with a status code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
    /// The platform reported neither.
    Unknown,
}

impl WorkerExit {
    /// Build from a `std::process::ExitStatus`.
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Unknown
    }

    /// Exit code zero.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exited with code {code}"),
            Self::Signal(signal) => write!(f, "killed by signal {signal}"),
            Self::Unknown => write!(f, "terminated for an unknown reason"),
        }
    }
}

// ── Stats ─────────────────────────────────────────────────────────

/// Latest resource and request figures for one worker.
///
/// CPU and memory are percentages (0–100) so they can be summed into a
/// utilization score without further weighting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub requests: u64,
    pub errors: u64,
    /// Mean response time in milliseconds.
    pub avg_response_time: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub memory_bytes: u64,
    /// Worker-reported uptime in seconds.
    pub uptime: f64,
    #[serde(skip)]
    pub last_heartbeat: Instant,
}

impl WorkerStats {
    pub fn new(now: Instant) -> Self {
        Self {
            requests: 0,
            errors: 0,
            avg_response_time: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            memory_bytes: 0,
            uptime: 0.0,
            last_heartbeat: now,
        }
    }

    /// Composite CPU + memory figure used to rank scale-down candidates.
    pub fn utilization_score(&self) -> f64 {
        self.cpu_usage + self.memory_usage
    }

    /// Time since the last heartbeat.
    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }
}

// ── Scaling ───────────────────────────────────────────────────────

/// Static autoscaling thresholds and pool bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingThresholds {
    /// Fleet-average CPU percentage above which the pool grows.
    pub cpu_pct: f64,
    /// Fleet-average memory percentage above which the pool grows.
    pub mem_pct: f64,
    /// Fleet-average response time (ms) above which the pool grows.
    pub response_ms: f64,
    pub min_workers: u32,
    pub max_workers: u32,
}

impl Default for ScalingThresholds {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(2);
        Self {
            cpu_pct: 80.0,
            mem_pct: 85.0,
            response_ms: 2000.0,
            min_workers: 2,
            max_workers: cores.max(2),
        }
    }
}

/// Direction of a scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingKind {
    Up,
    Down,
}

/// One applied scaling action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingEvent {
    pub kind: ScalingKind,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Live worker count once the action settles.
    pub resulting_count: u32,
    /// Worker started (up) or drained (down).
    pub worker: WorkerId,
}

// ── Load balancing ────────────────────────────────────────────────

/// How inbound connections are spread over workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    RoundRobin,
    Sticky,
}

/// A routable worker: Online, with a known local listen address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub worker_id: WorkerId,
    pub addr: SocketAddr,
}

// ── Reports ───────────────────────────────────────────────────────

/// Overall verdict of the cluster health predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCounts {
    pub total: u32,
    pub healthy: u32,
    pub health_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub error_rate: f64,
    pub avg_response_time: f64,
    pub total_requests: u64,
    pub worker_crashes: u64,
}

/// Derived cluster health, computed on demand and never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterHealthSnapshot {
    pub status: HealthState,
    pub workers: WorkerCounts,
    pub metrics: HealthMetrics,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl ClusterHealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Fleet-wide aggregates over all tracked workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub total_requests: u64,
    pub total_errors: u64,
    /// Errors over requests, 0.0–1.0.
    pub error_rate: f64,
    /// Request-weighted mean response time in milliseconds.
    pub avg_response_time: f64,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub worker_crashes: u64,
    pub worker_restarts: u64,
}

/// Phase of the graceful shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPhase {
    Running,
    Draining,
    Terminated,
}

/// One worker as seen by the HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    #[serde(flatten)]
    pub record: WorkerRecord,
    pub stats: WorkerStats,
    pub heartbeat_age_ms: u64,
}

/// Read-only view of the cluster, republished after every master event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReport {
    pub health: ClusterHealthSnapshot,
    pub fleet: FleetSummary,
    pub workers: Vec<WorkerReport>,
    pub last_scaling: Option<ScalingEvent>,
    pub phase: ShutdownPhase,
}

impl ClusterReport {
    /// Report for a master that has not forked anything yet.
    pub fn empty() -> Self {
        Self {
            health: ClusterHealthSnapshot {
                status: HealthState::Unhealthy,
                workers: WorkerCounts {
                    total: 0,
                    healthy: 0,
                    health_percentage: 0.0,
                },
                metrics: HealthMetrics {
                    error_rate: 0.0,
                    avg_response_time: 0.0,
                    total_requests: 0,
                    worker_crashes: 0,
                },
                timestamp: epoch_millis(),
            },
            fleet: FleetSummary::default(),
            workers: Vec::new(),
            last_scaling: None,
            phase: ShutdownPhase::Running,
        }
    }
}

/// Current wall-clock time as unix milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
