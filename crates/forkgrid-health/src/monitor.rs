//! Health monitor — heartbeat staleness and the cluster health predicate.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use forkgrid_core::config::HealthConfig;
use forkgrid_core::{
    ClusterHealthSnapshot, FleetSummary, HealthMetrics, HealthState, WorkerCounts, WorkerId,
    WorkerRecord, WorkerStats, WorkerStatus, epoch_millis,
};

/// A worker that missed its heartbeat deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unresponsive {
    pub id: WorkerId,
    pub silent_for: Duration,
}

/// Evaluates worker liveness against the configured thresholds.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    heartbeat_timeout: Duration,
    healthy_ratio: f64,
    max_error_rate: f64,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            heartbeat_timeout: config.heartbeat_timeout,
            healthy_ratio: config.healthy_ratio,
            max_error_rate: config.max_error_rate,
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Online with a heartbeat no older than the timeout.
    pub fn is_worker_healthy(&self, record: &WorkerRecord, stats: &WorkerStats, now: Instant) -> bool {
        record.status == WorkerStatus::Online && stats.heartbeat_age(now) <= self.heartbeat_timeout
    }

    /// Online workers whose heartbeat is strictly older than the timeout.
    ///
    /// Starting workers are governed by the readiness timer instead, and
    /// Draining workers by the grace timer.
    pub fn find_unresponsive<'a>(
        &self,
        workers: impl IntoIterator<Item = (&'a WorkerRecord, &'a WorkerStats)>,
        now: Instant,
    ) -> Vec<Unresponsive> {
        let mut silent = Vec::new();
        for (record, stats) in workers {
            if record.status != WorkerStatus::Online {
                continue;
            }
            let age = stats.heartbeat_age(now);
            if age > self.heartbeat_timeout {
                warn!(
                    worker = record.id,
                    silent_ms = age.as_millis() as u64,
                    timeout_ms = self.heartbeat_timeout.as_millis() as u64,
                    "worker missed heartbeat deadline"
                );
                silent.push(Unresponsive {
                    id: record.id,
                    silent_for: age,
                });
            }
        }
        silent
    }

    /// Derive the cluster health snapshot.
    ///
    /// `total` counts serving workers only. Starting workers are covered by
    /// the readiness timer and Draining workers are leaving on purpose, so
    /// neither a scale action nor a restart degrades the cluster.
    pub fn snapshot<'a>(
        &self,
        workers: impl IntoIterator<Item = (&'a WorkerRecord, &'a WorkerStats)>,
        fleet: &FleetSummary,
        now: Instant,
    ) -> ClusterHealthSnapshot {
        let mut total = 0u32;
        let mut healthy = 0u32;
        for (record, stats) in workers {
            if record.status != WorkerStatus::Online {
                continue;
            }
            total += 1;
            if self.is_worker_healthy(record, stats, now) {
                healthy += 1;
            }
        }

        let health_percentage = if total > 0 {
            healthy as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let status = if cluster_is_healthy(
            healthy,
            total,
            fleet.error_rate,
            self.healthy_ratio,
            self.max_error_rate,
        ) {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };
        debug!(total, healthy, ?status, "cluster health evaluated");

        ClusterHealthSnapshot {
            status,
            workers: WorkerCounts {
                total,
                healthy,
                health_percentage,
            },
            metrics: HealthMetrics {
                error_rate: fleet.error_rate,
                avg_response_time: fleet.avg_response_time,
                total_requests: fleet.total_requests,
                worker_crashes: fleet.worker_crashes,
            },
            timestamp: epoch_millis(),
        }
    }
}

/// `healthy / total >= healthy_ratio` and `error_rate < max_error_rate`.
///
/// An empty pool is never healthy.
pub fn cluster_is_healthy(
    healthy: u32,
    total: u32,
    error_rate: f64,
    healthy_ratio: f64,
    max_error_rate: f64,
) -> bool {
    if total == 0 {
        return false;
    }
    let ratio = healthy as f64 / total as f64;
    ratio >= healthy_ratio && error_rate < max_error_rate
}
