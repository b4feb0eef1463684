//! Graceful shutdown coordinator.
//!
//! Running → Draining → Terminated. Draining asks every live worker to
//! stop (each with its own grace timer inside the pool) and keeps applying
//! pool events until the pool is empty or the global timeout elapses.
//! Workers still tracked at the deadline are killed and reported.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use forkgrid_core::{ClusterError, ShutdownPhase, WorkerId};
use forkgrid_pool::{PoolEventReceiver, Spawner, WorkerPool};

/// Outcome of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers asked to stop gracefully.
    pub stopped: usize,
    /// Workers killed because the global timeout elapsed first.
    pub forced: Vec<WorkerId>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty()
    }
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    timeout: Duration,
    phase: ShutdownPhase,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            phase: ShutdownPhase::Running,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    /// Drain `pool`, applying its events until empty or timed out.
    ///
    /// `on_change` runs after every applied event so the caller can
    /// republish state. Event errors are logged; nothing here can fail.
    pub async fn drain<S, F>(
        &mut self,
        pool: &mut WorkerPool<S>,
        events: &mut PoolEventReceiver,
        mut on_change: F,
    ) -> ShutdownReport
    where
        S: Spawner,
        F: FnMut(&WorkerPool<S>, ShutdownPhase),
    {
        let started = Instant::now();
        let deadline = tokio::time::sleep_until(started + self.timeout);
        tokio::pin!(deadline);

        self.phase = ShutdownPhase::Draining;
        let stopped = pool.begin_shutdown();
        info!(
            workers = stopped,
            timeout_ms = self.timeout.as_millis() as u64,
            "draining worker pool"
        );
        on_change(&*pool, self.phase);

        while !pool.is_drained() {
            tokio::select! {
                _ = &mut deadline => break,
                Some(event) = events.recv() => {
                    if let Err(e) = pool.handle_event(event).await {
                        warn!(error = %e, "error while draining");
                    }
                    on_change(&*pool, self.phase);
                }
            }
        }

        let forced = if pool.is_drained() {
            Vec::new()
        } else {
            let ids = pool.force_kill_remaining();
            for id in &ids {
                let err = ClusterError::ShutdownTimeout { id: *id };
                warn!(worker = *id, error = %err, "forcing worker down");
            }
            ids
        };

        self.phase = ShutdownPhase::Terminated;
        let report = ShutdownReport {
            stopped,
            forced,
            elapsed: started.elapsed(),
        };
        info!(
            stopped = report.stopped,
            forced = report.forced.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "worker pool drained"
        );
        on_change(&*pool, self.phase);
        report
    }
}
