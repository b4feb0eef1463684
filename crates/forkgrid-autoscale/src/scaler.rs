//! Autoscaler — evaluates fleet averages against static thresholds.
//!
//! The autoscaler never touches the pool itself. `evaluate` returns a
//! `ScaleDecision` and the caller applies it, then reports back through
//! `record` so cooldown and history stay accurate.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use forkgrid_core::config::AutoscaleConfig;
use forkgrid_core::{
    ClusterError, ScalingEvent, ScalingKind, ScalingThresholds, WorkerId, WorkerStats,
    epoch_millis,
};

const HISTORY_LIMIT: usize = 64;

/// A scaling decision for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Start exactly one worker.
    ScaleUp,
    /// Gracefully stop the named worker.
    ScaleDown(WorkerId),
    /// No change needed.
    NoChange,
}

/// Averages over the Online workers that reported stats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FleetAverages {
    pub cpu: f64,
    pub memory: f64,
    pub response_time: f64,
    pub error_rate: f64,
    pub samples: usize,
}

impl FleetAverages {
    /// Fails when there is nothing to average or a sample is not finite.
    pub fn compute<'a>(
        online: impl IntoIterator<Item = (WorkerId, &'a WorkerStats)>,
    ) -> Result<Self, ClusterError> {
        let mut samples = 0usize;
        let (mut cpu, mut memory, mut response_time) = (0.0, 0.0, 0.0);
        let (mut requests, mut errors) = (0u64, 0u64);

        for (id, stats) in online {
            for (field, value) in [
                ("cpu_usage", stats.cpu_usage),
                ("memory_usage", stats.memory_usage),
                ("avg_response_time", stats.avg_response_time),
            ] {
                if !value.is_finite() {
                    return Err(ClusterError::ScalingComputation(format!(
                        "worker {id} reported non-finite {field}"
                    )));
                }
            }
            samples += 1;
            cpu += stats.cpu_usage;
            memory += stats.memory_usage;
            response_time += stats.avg_response_time;
            requests += stats.requests;
            errors += stats.errors;
        }

        if samples == 0 {
            return Err(ClusterError::ScalingComputation(
                "no online workers to sample".into(),
            ));
        }

        let n = samples as f64;
        Ok(Self {
            cpu: cpu / n,
            memory: memory / n,
            response_time: response_time / n,
            error_rate: if requests > 0 {
                errors as f64 / requests as f64
            } else {
                0.0
            },
            samples,
        })
    }
}

/// Threshold autoscaler with a hysteresis band and a scale-down cooldown.
pub struct Autoscaler {
    thresholds: ScalingThresholds,
    scale_down_cooldown: Duration,
    last_scale_up: Option<Instant>,
    history: VecDeque<ScalingEvent>,
}

impl Autoscaler {
    pub fn new(thresholds: ScalingThresholds, config: &AutoscaleConfig) -> Self {
        Self {
            thresholds,
            scale_down_cooldown: config.scale_down_cooldown,
            last_scale_up: None,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }

    pub fn thresholds(&self) -> &ScalingThresholds {
        &self.thresholds
    }

    /// Decide this tick's action.
    ///
    /// `live` counts Starting and Online workers. `online` carries the
    /// stats of Online workers only; they are both the averaging base and
    /// the scale-down candidates.
    pub fn evaluate(
        &self,
        live: u32,
        online: &[(WorkerId, &WorkerStats)],
        now: Instant,
    ) -> Result<ScaleDecision, ClusterError> {
        let avg = FleetAverages::compute(online.iter().copied())?;
        let t = &self.thresholds;

        let hot = avg.cpu > t.cpu_pct || avg.memory > t.mem_pct || avg.response_time > t.response_ms;
        if hot {
            if live < t.max_workers {
                debug!(
                    live,
                    avg_cpu = avg.cpu,
                    avg_memory = avg.memory,
                    avg_response_time = avg.response_time,
                    "scale-up condition met"
                );
                return Ok(ScaleDecision::ScaleUp);
            }
            debug!(live, max = t.max_workers, "pool at maximum, not scaling up");
            return Ok(ScaleDecision::NoChange);
        }

        let cold = avg.cpu < t.cpu_pct / 2.0
            && avg.memory < t.mem_pct / 2.0
            && avg.response_time < t.response_ms / 2.0;
        if !cold || live <= t.min_workers {
            return Ok(ScaleDecision::NoChange);
        }

        if let Some(at) = self.last_scale_up {
            let since = now.saturating_duration_since(at);
            if since < self.scale_down_cooldown {
                debug!(
                    since_scale_up_ms = since.as_millis() as u64,
                    "scale-down suppressed by cooldown"
                );
                return Ok(ScaleDecision::NoChange);
            }
        }

        Ok(pick_scale_down(online)
            .map(ScaleDecision::ScaleDown)
            .unwrap_or(ScaleDecision::NoChange))
    }

    /// Record an applied action.
    pub fn record(
        &mut self,
        kind: ScalingKind,
        worker: WorkerId,
        resulting_count: u32,
        now: Instant,
    ) -> ScalingEvent {
        if kind == ScalingKind::Up {
            self.last_scale_up = Some(now);
        }
        let event = ScalingEvent {
            kind,
            timestamp: epoch_millis(),
            resulting_count,
            worker,
        };
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());
        info!(?kind, worker, resulting_count, "scaling action applied");
        event
    }

    pub fn last_event(&self) -> Option<&ScalingEvent> {
        self.history.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &ScalingEvent> {
        self.history.iter()
    }
}

/// Lowest utilization score; ties go to the most recently started worker.
fn pick_scale_down(online: &[(WorkerId, &WorkerStats)]) -> Option<WorkerId> {
    online
        .iter()
        .min_by(|(a_id, a), (b_id, b)| {
            a.utilization_score()
                .total_cmp(&b.utilization_score())
                .then_with(|| b_id.cmp(a_id))
        })
        .map(|(id, _)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(min: u32, max: u32) -> ScalingThresholds {
        ScalingThresholds {
            cpu_pct: 80.0,
            mem_pct: 85.0,
            response_ms: 2000.0,
            min_workers: min,
            max_workers: max,
        }
    }

    fn stats(cpu: f64, mem: f64, rt: f64) -> WorkerStats {
        let mut s = WorkerStats::new(Instant::now());
        s.cpu_usage = cpu;
        s.memory_usage = mem;
        s.avg_response_time = rt;
        s
    }

    fn scaler(min: u32, max: u32) -> Autoscaler {
        Autoscaler::new(thresholds(min, max), &AutoscaleConfig::default())
    }

    #[test]
    fn hot_cpu_scales_up_by_one() {
        let scaler = scaler(2, 4);
        let a = stats(90.0, 10.0, 100.0);
        let b = stats(90.0, 10.0, 100.0);
        let decision = scaler
            .evaluate(2, &[(1, &a), (2, &b)], Instant::now())
            .unwrap();
        assert_eq!(decision, ScaleDecision::ScaleUp);
    }

    #[test]
    fn slow_responses_alone_scale_up() {
        let scaler = scaler(1, 4);
        let a = stats(5.0, 5.0, 2500.0);
        let decision = scaler.evaluate(1, &[(1, &a)], Instant::now()).unwrap();
        assert_eq!(decision, ScaleDecision::ScaleUp);
    }

    #[test]
    fn never_scales_past_max() {
        let scaler = scaler(2, 2);
        let a = stats(99.0, 99.0, 5000.0);
        let b = stats(99.0, 99.0, 5000.0);
        let decision = scaler
            .evaluate(2, &[(1, &a), (2, &b)], Instant::now())
            .unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
    }

    #[test]
    fn cold_fleet_drains_lowest_score() {
        let scaler = scaler(2, 8);
        let w1 = stats(12.0, 6.0, 50.0);
        let w2 = stats(8.0, 4.0, 50.0);
        let w3 = stats(14.0, 5.0, 50.0);
        let w4 = stats(6.0, 5.0, 50.0);
        // avg cpu 10, avg mem 5, avg rt 50.
        let online = [(1, &w1), (2, &w2), (3, &w3), (4, &w4)];
        let decision = scaler.evaluate(4, &online, Instant::now()).unwrap();
        assert_eq!(decision, ScaleDecision::ScaleDown(4));
    }

    #[test]
    fn score_ties_go_to_newest_worker() {
        let scaler = scaler(1, 8);
        let a = stats(5.0, 5.0, 10.0);
        let b = stats(5.0, 5.0, 10.0);
        let c = stats(4.0, 6.0, 10.0);
        let decision = scaler
            .evaluate(3, &[(3, &a), (7, &b), (5, &c)], Instant::now())
            .unwrap();
        assert_eq!(decision, ScaleDecision::ScaleDown(7));
    }

    #[test]
    fn never_scales_below_min() {
        let scaler = scaler(2, 8);
        let a = stats(1.0, 1.0, 1.0);
        let b = stats(1.0, 1.0, 1.0);
        let decision = scaler
            .evaluate(2, &[(1, &a), (2, &b)], Instant::now())
            .unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
    }

    #[test]
    fn hysteresis_band_is_stable() {
        let scaler = scaler(2, 8);
        // Above half of every threshold, below every threshold.
        let a = stats(60.0, 50.0, 1200.0);
        let b = stats(50.0, 45.0, 1100.0);
        let online = [(1, &a), (2, &b)];
        let now = Instant::now();
        for _ in 0..20 {
            assert_eq!(
                scaler.evaluate(4, &online, now).unwrap(),
                ScaleDecision::NoChange
            );
        }
    }

    #[test]
    fn one_warm_metric_blocks_scale_down() {
        let scaler = scaler(2, 8);
        // cpu and rt are cold, memory sits inside the band.
        let a = stats(5.0, 50.0, 10.0);
        let decision = scaler.evaluate(4, &[(1, &a)], Instant::now()).unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_suppresses_scale_down_after_scale_up() {
        let mut scaler = scaler(1, 8);
        scaler.record(ScalingKind::Up, 3, 3, Instant::now());

        let a = stats(1.0, 1.0, 1.0);
        let online = [(1, &a)];

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(
            scaler.evaluate(3, &online, Instant::now()).unwrap(),
            ScaleDecision::NoChange
        );

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(
            scaler.evaluate(3, &online, Instant::now()).unwrap(),
            ScaleDecision::ScaleDown(1)
        );
    }

    #[test]
    fn empty_fleet_is_a_computation_error() {
        let scaler = scaler(1, 4);
        let err = scaler.evaluate(1, &[], Instant::now()).unwrap_err();
        assert!(matches!(err, ClusterError::ScalingComputation(_)));
    }

    #[test]
    fn non_finite_sample_is_a_computation_error() {
        let scaler = scaler(1, 4);
        let a = stats(f64::NAN, 1.0, 1.0);
        let err = scaler.evaluate(1, &[(1, &a)], Instant::now()).unwrap_err();
        assert!(matches!(err, ClusterError::ScalingComputation(_)));
    }

    #[test]
    fn averages_include_error_rate() {
        let mut a = stats(10.0, 20.0, 100.0);
        a.requests = 8;
        a.errors = 2;
        let mut b = stats(30.0, 40.0, 300.0);
        b.requests = 2;
        let avg = FleetAverages::compute([(1, &a), (2, &b)]).unwrap();
        assert_eq!(avg.cpu, 20.0);
        assert_eq!(avg.memory, 30.0);
        assert_eq!(avg.response_time, 200.0);
        assert!((avg.error_rate - 0.2).abs() < 1e-9);
        assert_eq!(avg.samples, 2);
    }

    #[test]
    fn history_is_bounded() {
        let mut scaler = scaler(1, 4);
        let now = Instant::now();
        for i in 0..100 {
            scaler.record(ScalingKind::Down, i, 1, now);
        }
        assert_eq!(scaler.history().count(), HISTORY_LIMIT);
        assert_eq!(scaler.last_event().unwrap().worker, 99);
    }
}
