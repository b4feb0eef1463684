//! Metrics collector — per-worker stats keyed by worker id.
//!
//! Owned by the master's event loop, so plain maps are enough: there is
//! exactly one writer and readers only ever see published reports.

use std::collections::BTreeMap;

use tokio::time::Instant;
use tracing::{debug, trace};

use forkgrid_core::{FleetSummary, WorkerId, WorkerStats};

/// Collects stats for every tracked worker plus lifetime counters.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    stats: BTreeMap<WorkerId, WorkerStats>,
    /// Request accounting folded in from workers that have exited.
    retired: RetiredTotals,
    worker_crashes: u64,
    worker_restarts: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct RetiredTotals {
    requests: u64,
    errors: u64,
    /// Sum of response times in milliseconds.
    response_time: f64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a worker with empty stats.
    ///
    /// The heartbeat clock starts at `now`.
    pub fn register(&mut self, id: WorkerId, now: Instant) {
        self.stats.insert(id, WorkerStats::new(now));
        debug!(worker = id, "registered for metrics collection");
    }

    /// Stop tracking a worker, returning its final stats.
    ///
    /// Its request and error counts stay in the fleet totals.
    pub fn unregister(&mut self, id: WorkerId) -> Option<WorkerStats> {
        let removed = self.stats.remove(&id)?;
        self.retired.requests += removed.requests;
        self.retired.errors += removed.errors;
        self.retired.response_time += removed.avg_response_time * removed.requests as f64;
        debug!(
            worker = id,
            requests = removed.requests,
            errors = removed.errors,
            "unregistered from metrics collection"
        );
        Some(removed)
    }

    /// Apply a `worker_metrics` report. Last write wins.
    ///
    /// Returns `false` if the worker is not tracked.
    pub fn record_sample(
        &mut self,
        id: WorkerId,
        cpu_usage: f64,
        memory_usage: f64,
        memory_bytes: u64,
        uptime: f64,
    ) -> bool {
        let Some(stats) = self.stats.get_mut(&id) else {
            return false;
        };
        stats.cpu_usage = cpu_usage;
        stats.memory_usage = memory_usage;
        stats.memory_bytes = memory_bytes;
        stats.uptime = uptime;
        trace!(worker = id, cpu_usage, memory_usage, "worker sample");
        true
    }

    /// Apply a `request_complete` report to the running mean.
    pub fn record_request(&mut self, id: WorkerId, response_time: f64, error: bool) -> bool {
        let Some(stats) = self.stats.get_mut(&id) else {
            return false;
        };
        stats.requests += 1;
        if error {
            stats.errors += 1;
        }
        let n = stats.requests as f64;
        stats.avg_response_time += (response_time - stats.avg_response_time) / n;
        true
    }

    /// Refresh a worker's heartbeat.
    pub fn heartbeat(&mut self, id: WorkerId, now: Instant) -> bool {
        match self.stats.get_mut(&id) {
            Some(stats) => {
                stats.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    pub fn record_crash(&mut self) {
        self.worker_crashes += 1;
    }

    pub fn record_restart(&mut self) {
        self.worker_restarts += 1;
    }

    pub fn worker_crashes(&self) -> u64 {
        self.worker_crashes
    }

    pub fn worker_restarts(&self) -> u64 {
        self.worker_restarts
    }

    pub fn get(&self, id: WorkerId) -> Option<&WorkerStats> {
        self.stats.get(&id)
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.stats.contains_key(&id)
    }

    /// Tracked worker ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.stats.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, &WorkerStats)> {
        self.stats.iter().map(|(id, s)| (*id, s))
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Fleet aggregate.
    ///
    /// Request, error and response-time figures cover the master's lifetime,
    /// including workers that have since exited. CPU and memory averages
    /// cover tracked workers only.
    pub fn summary(&self) -> FleetSummary {
        let total_requests: u64 =
            self.retired.requests + self.stats.values().map(|s| s.requests).sum::<u64>();
        let total_errors: u64 =
            self.retired.errors + self.stats.values().map(|s| s.errors).sum::<u64>();

        let error_rate = if total_requests > 0 {
            total_errors as f64 / total_requests as f64
        } else {
            0.0
        };

        // Weighted by request count so idle workers do not drag the mean down.
        let avg_response_time = if total_requests > 0 {
            let tracked: f64 = self
                .stats
                .values()
                .map(|s| s.avg_response_time * s.requests as f64)
                .sum();
            (self.retired.response_time + tracked) / total_requests as f64
        } else {
            0.0
        };

        let n = self.stats.len();
        let (avg_cpu, avg_memory) = if n > 0 {
            (
                self.stats.values().map(|s| s.cpu_usage).sum::<f64>() / n as f64,
                self.stats.values().map(|s| s.memory_usage).sum::<f64>() / n as f64,
            )
        } else {
            (0.0, 0.0)
        };

        FleetSummary {
            total_requests,
            total_errors,
            error_rate,
            avg_response_time,
            avg_cpu,
            avg_memory,
            worker_crashes: self.worker_crashes,
            worker_restarts: self.worker_restarts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn register_and_unregister() {
        let mut collector = MetricsCollector::new();
        let now = Instant::now();
        collector.register(1, now);
        collector.register(2, now);

        assert_eq!(collector.len(), 2);
        assert_eq!(collector.ids().collect::<Vec<_>>(), vec![1, 2]);

        assert!(collector.unregister(1).is_some());
        assert!(collector.unregister(1).is_none());
        assert!(!collector.contains(1));
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn unknown_workers_are_ignored() {
        let mut collector = MetricsCollector::new();
        assert!(!collector.record_sample(9, 1.0, 1.0, 0, 1.0));
        assert!(!collector.record_request(9, 10.0, false));
        assert!(!collector.heartbeat(9, Instant::now()));
        assert!(collector.is_empty());
    }

    #[test]
    fn samples_are_last_write_wins() {
        let mut collector = MetricsCollector::new();
        collector.register(1, Instant::now());

        collector.record_sample(1, 50.0, 10.0, 1024, 5.0);
        collector.record_sample(1, 20.0, 12.0, 2048, 10.0);

        let stats = collector.get(1).unwrap();
        assert_eq!(stats.cpu_usage, 20.0);
        assert_eq!(stats.memory_usage, 12.0);
        assert_eq!(stats.memory_bytes, 2048);
        assert_eq!(stats.uptime, 10.0);
    }

    #[test]
    fn request_accounting_keeps_running_mean() {
        let mut collector = MetricsCollector::new();
        collector.register(1, Instant::now());

        collector.record_request(1, 100.0, false);
        collector.record_request(1, 200.0, true);
        collector.record_request(1, 300.0, false);

        let stats = collector.get(1).unwrap();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.errors, 1);
        assert!((stats.avg_response_time - 200.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_resets_age() {
        let mut collector = MetricsCollector::new();
        collector.register(1, Instant::now());

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(
            collector.get(1).unwrap().heartbeat_age(Instant::now()),
            Duration::from_secs(20)
        );

        collector.heartbeat(1, Instant::now());
        assert_eq!(
            collector.get(1).unwrap().heartbeat_age(Instant::now()),
            Duration::ZERO
        );
    }

    #[test]
    fn summary_aggregates_fleet() {
        let mut collector = MetricsCollector::new();
        let now = Instant::now();
        collector.register(1, now);
        collector.register(2, now);

        collector.record_sample(1, 40.0, 10.0, 0, 1.0);
        collector.record_sample(2, 20.0, 30.0, 0, 1.0);
        for _ in 0..3 {
            collector.record_request(1, 100.0, false);
        }
        collector.record_request(2, 500.0, true);
        collector.record_crash();
        collector.record_restart();

        let summary = collector.summary();
        assert_eq!(summary.total_requests, 4);
        assert_eq!(summary.total_errors, 1);
        assert!((summary.error_rate - 0.25).abs() < 1e-9);
        assert!((summary.avg_response_time - 200.0).abs() < 1e-9);
        assert!((summary.avg_cpu - 30.0).abs() < 1e-9);
        assert!((summary.avg_memory - 20.0).abs() < 1e-9);
        assert_eq!(summary.worker_crashes, 1);
        assert_eq!(summary.worker_restarts, 1);
    }

    #[test]
    fn exited_workers_stay_in_request_totals() {
        let mut collector = MetricsCollector::new();
        let now = Instant::now();
        collector.register(1, now);
        collector.register(2, now);
        for _ in 0..10 {
            collector.record_request(1, 50.0, true);
        }
        collector.record_request(2, 160.0, false);

        let before = collector.summary();
        assert_eq!(before.total_requests, 11);
        assert_eq!(before.total_errors, 10);

        collector.unregister(1);
        collector.record_crash();
        collector.register(3, now);

        let after = collector.summary();
        assert_eq!(after.total_requests, 11);
        assert_eq!(after.total_errors, 10);
        assert!((after.error_rate - before.error_rate).abs() < 1e-9);
        assert!((after.avg_response_time - 60.0).abs() < 1e-9);

        // A second unregister of the same id folds nothing in.
        assert!(collector.unregister(1).is_none());
        collector.record_request(3, 60.0, false);
        assert_eq!(collector.summary().total_requests, 12);
        assert_eq!(collector.summary().total_errors, 10);
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let summary = MetricsCollector::new().summary();
        assert_eq!(summary, FleetSummary::default());
    }
}
