//! The master event loop.

use std::future::Future;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use forkgrid_autoscale::{Autoscaler, ScaleDecision};
use forkgrid_core::config::ClusterConfig;
use forkgrid_core::{
    Backend, ClusterError, ClusterReport, MasterMessage, ScalingEvent, ScalingKind,
    ShutdownPhase, WorkerReport, epoch_millis,
};
use forkgrid_health::{HealthMonitor, Unresponsive};
use forkgrid_pool::{PoolEventReceiver, PoolSettings, Spawner, WorkerPool};

use crate::error::MasterError;
use crate::periodic::PeriodicTask;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};

/// Owns the pool and everything that decides what happens to it.
pub struct Supervisor<S> {
    config: ClusterConfig,
    pool: WorkerPool<S>,
    events: PoolEventReceiver,
    autoscaler: Autoscaler,
    health: HealthMonitor,
    shutdown: ShutdownCoordinator,
    reports: watch::Sender<ClusterReport>,
    backends: watch::Sender<Vec<Backend>>,
}

impl<S: Spawner> Supervisor<S> {
    pub fn new(config: ClusterConfig, spawner: S) -> Self {
        let (pool, events) = WorkerPool::new(spawner, PoolSettings::from_config(&config));
        let (reports, _) = watch::channel(ClusterReport::empty());
        let (backends, _) = watch::channel(Vec::new());
        Self {
            autoscaler: Autoscaler::new(config.thresholds.clone(), &config.autoscale),
            health: HealthMonitor::new(&config.health),
            shutdown: ShutdownCoordinator::new(config.shutdown.timeout),
            config,
            pool,
            events,
            reports,
            backends,
        }
    }

    /// Cluster reports, republished after every event.
    pub fn subscribe_reports(&self) -> watch::Receiver<ClusterReport> {
        self.reports.subscribe()
    }

    /// The routable worker set, republished only when it changes.
    pub fn subscribe_backends(&self) -> watch::Receiver<Vec<Backend>> {
        self.backends.subscribe()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.shutdown.phase()
    }

    /// Fork the initial pool.
    ///
    /// If a fork fails part way, the workers already forked are killed
    /// before the error is returned.
    pub async fn start(&mut self) -> Result<(), MasterError> {
        let count = self.config.initial_worker_count();
        info!(
            workers = count,
            min = self.config.thresholds.min_workers,
            max = self.config.thresholds.max_workers,
            "starting worker pool"
        );
        for _ in 0..count {
            if let Err(e) = self.pool.start_worker().await {
                let e = MasterError::from(e);
                error!(error = %e, "initial fork failed, killing forked workers");
                let killed = self.pool.force_kill_remaining();
                warn!(workers = killed.len(), "workers killed");
                self.publish();
                return Err(e);
            }
        }
        self.publish();
        Ok(())
    }

    /// Supervise until `shutdown` resolves, then drain the pool.
    ///
    /// Returns an error only when a worker could not be forked. In that
    /// case every remaining worker has already been killed.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<ShutdownReport, MasterError>
    where
        F: Future<Output = ()>,
    {
        let mut health_task = PeriodicTask::new("health", self.config.health.interval);
        let mut autoscale_task = PeriodicTask::new("autoscale", self.config.autoscale.interval);
        tokio::pin!(shutdown);

        let outcome = loop {
            let step = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("termination requested");
                    break Ok(());
                }
                Some(event) = self.events.recv() => {
                    self.pool.handle_event(event).await.map_err(MasterError::from)
                }
                _ = health_task.tick() => self.health_tick().await,
                _ = autoscale_task.tick() => self.autoscale_tick().await,
            };
            if let Err(e) = step {
                if e.is_fatal() {
                    break Err(e);
                }
                warn!(error = %e, "supervisor step failed");
            }
            self.publish();
        };

        health_task.cancel();
        autoscale_task.cancel();

        if let Err(e) = outcome {
            error!(error = %e, "fatal pool error, killing remaining workers");
            let killed = self.pool.force_kill_remaining();
            warn!(workers = killed.len(), "workers killed");
            self.publish();
            return Err(e);
        }

        let Self {
            pool,
            events,
            shutdown,
            health,
            autoscaler,
            reports,
            backends,
            ..
        } = self;
        let report = shutdown
            .drain(pool, events, |pool, phase| {
                let report = build_report(pool, health, autoscaler.last_event(), phase);
                publish_to(reports, backends, report, pool.backends());
            })
            .await;
        Ok(report)
    }

    /// Restart silent workers, then probe the rest.
    async fn health_tick(&mut self) -> Result<(), MasterError> {
        let now = Instant::now();
        let silent = self.health.find_unresponsive(self.pool.workers(), now);
        for Unresponsive { id, silent_for } in silent {
            let err = ClusterError::WorkerUnresponsive { id, silent_for };
            error!(worker = id, error = %err, "restarting unresponsive worker");
            self.pool.note_crash();
            self.pool.restart_worker(id).await?;
        }

        let probe = MasterMessage::HealthCheck {
            timestamp: epoch_millis(),
        };
        let sent = self.pool.broadcast(&probe);
        debug!(workers = sent, "health check sent");
        Ok(())
    }

    /// Apply at most one scaling action.
    async fn autoscale_tick(&mut self) -> Result<(), MasterError> {
        let now = Instant::now();
        let live = self.pool.live_count();
        let decision = match self.autoscaler.evaluate(live, &self.pool.online_stats(), now) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "skipping autoscale tick");
                return Ok(());
            }
        };

        match decision {
            ScaleDecision::ScaleUp => {
                let id = self.pool.start_worker().await?;
                self.autoscaler
                    .record(ScalingKind::Up, id, self.pool.live_count(), now);
            }
            ScaleDecision::ScaleDown(id) => {
                if self.pool.stop_worker(id, true) {
                    self.autoscaler
                        .record(ScalingKind::Down, id, self.pool.live_count(), now);
                }
            }
            ScaleDecision::NoChange => {}
        }
        Ok(())
    }

    fn publish(&self) {
        let report = build_report(
            &self.pool,
            &self.health,
            self.autoscaler.last_event(),
            self.shutdown.phase(),
        );
        publish_to(&self.reports, &self.backends, report, self.pool.backends());
    }
}

fn build_report<S: Spawner>(
    pool: &WorkerPool<S>,
    health: &HealthMonitor,
    last_scaling: Option<&ScalingEvent>,
    phase: ShutdownPhase,
) -> ClusterReport {
    let now = Instant::now();
    let fleet = pool.metrics().summary();
    let snapshot = health.snapshot(pool.workers(), &fleet, now);
    let workers = pool
        .workers()
        .map(|(record, stats)| WorkerReport {
            record: record.clone(),
            stats: stats.clone(),
            heartbeat_age_ms: stats.heartbeat_age(now).as_millis() as u64,
        })
        .collect();
    ClusterReport {
        health: snapshot,
        fleet,
        workers,
        last_scaling: last_scaling.cloned(),
        phase,
    }
}

fn publish_to(
    reports: &watch::Sender<ClusterReport>,
    backends: &watch::Sender<Vec<Backend>>,
    report: ClusterReport,
    live: Vec<Backend>,
) {
    reports.send_replace(report);
    backends.send_if_modified(|current| {
        if *current == live {
            return false;
        }
        *current = live;
        true
    });
}
