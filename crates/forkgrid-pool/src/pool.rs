//! The worker pool: records, stats, handles, and their timers.

use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use forkgrid_core::config::ClusterConfig;
use forkgrid_core::{
    Backend, ClusterError, MasterMessage, WorkerExit, WorkerId, WorkerMessage, WorkerRecord,
    WorkerStats, WorkerStatus,
};
use forkgrid_metrics::MetricsCollector;

use crate::backoff::{RestartHistory, RestartPolicy};
use crate::error::{PoolError, PoolResult};
use crate::event::{PoolEvent, PoolEventReceiver, PoolEventSender};
use crate::spawner::{Spawner, WorkerHandle};

/// Timing and sizing knobs of the pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSettings {
    pub start_timeout: Duration,
    pub grace_period: Duration,
    pub restart: RestartPolicy,
    /// A clean, unrequested exit is only replaced below this size.
    pub min_workers: u32,
}

impl PoolSettings {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            start_timeout: config.pool.start_timeout,
            grace_period: config.pool.grace_period,
            restart: RestartPolicy::from_config(&config.pool),
            min_workers: config.thresholds.min_workers,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&ClusterConfig::default())
    }
}

struct Slot {
    record: WorkerRecord,
    handle: WorkerHandle,
    history: RestartHistory,
    /// Known once the worker reports `ready`.
    addr: Option<SocketAddr>,
    start_timer: Option<JoinHandle<()>>,
    grace_timer: Option<JoinHandle<()>>,
}

impl Slot {
    fn cancel_timers(&mut self) {
        if let Some(t) = self.start_timer.take() {
            t.abort();
        }
        if let Some(t) = self.grace_timer.take() {
            t.abort();
        }
    }
}

struct PendingRespawn {
    timer: JoinHandle<()>,
    history: RestartHistory,
}

/// Supervises worker processes.
///
/// Invariant: every tracked worker has exactly one record and one stats
/// entry; both are inserted and removed within the same call.
pub struct WorkerPool<S> {
    spawner: S,
    settings: PoolSettings,
    slots: BTreeMap<WorkerId, Slot>,
    metrics: MetricsCollector,
    /// Killed workers removed from the books, still owed an exit event.
    retired: HashMap<WorkerId, WorkerHandle>,
    /// Delayed respawns, keyed by the worker they replace.
    pending: HashMap<WorkerId, PendingRespawn>,
    next_id: WorkerId,
    events: PoolEventSender,
    accepting: bool,
}

impl<S: Spawner> WorkerPool<S> {
    /// Create an empty pool and the receiver its events arrive on.
    pub fn new(spawner: S, settings: PoolSettings) -> (Self, PoolEventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let pool = Self {
            spawner,
            settings,
            slots: BTreeMap::new(),
            metrics: MetricsCollector::new(),
            retired: HashMap::new(),
            pending: HashMap::new(),
            next_id: 1,
            events,
            accepting: true,
        };
        (pool, rx)
    }

    // ── Operations ────────────────────────────────────────────────

    /// Fork a new worker.
    ///
    /// Returns as soon as the process exists, without waiting for its
    /// readiness ack. The id stays Starting and unroutable until the worker
    /// reports `ready`; if that never happens the start timeout replaces it.
    pub async fn start_worker(&mut self) -> PoolResult<WorkerId> {
        self.start_with(RestartHistory::default()).await
    }

    async fn start_with(&mut self, history: RestartHistory) -> PoolResult<WorkerId> {
        if !self.accepting {
            return Err(PoolError::ShuttingDown);
        }
        let id = self.next_id;
        self.next_id += 1;

        let handle = match self.spawner.spawn(id, self.events.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(worker = id, error = %e, "failed to fork worker");
                return Err(e);
            }
        };

        let record = WorkerRecord::new(id, handle.pid, history.count());
        let start_timer = arm_timer(
            self.settings.start_timeout,
            &self.events,
            PoolEvent::StartTimeout { id },
        );
        info!(worker = id, pid = ?handle.pid, restart_count = history.count(), "worker forked");

        self.slots.insert(
            id,
            Slot {
                record,
                handle,
                history,
                addr: None,
                start_timer: Some(start_timer),
                grace_timer: None,
            },
        );
        self.metrics.register(id, Instant::now());
        Ok(id)
    }

    /// Move a live worker to Draining and ask it to exit.
    ///
    /// Graceful stops send `shutdown` and kill once the grace period runs
    /// out; otherwise the worker is killed immediately. The record stays
    /// until the exit is observed. Returns `false` if `id` is not live.
    pub fn stop_worker(&mut self, id: WorkerId, graceful: bool) -> bool {
        let grace_period = self.settings.grace_period;
        let Some(slot) = self.slots.get_mut(&id) else {
            return false;
        };
        if !slot.record.is_live() {
            return false;
        }
        slot.record.advance(WorkerStatus::Draining);
        slot.cancel_timers();

        if graceful {
            slot.handle.send(MasterMessage::Shutdown);
            slot.grace_timer = Some(arm_timer(
                grace_period,
                &self.events,
                PoolEvent::GraceExpired { id },
            ));
            info!(worker = id, grace_ms = grace_period.as_millis() as u64, "draining worker");
        } else {
            slot.handle.kill();
            info!(worker = id, "killing worker");
        }
        true
    }

    /// Replace a worker, inheriting its restart history.
    ///
    /// A still-tracked worker is killed, marked Dead, and dropped from the
    /// books before its replacement is inserted. A worker whose replacement
    /// is still waiting out a backoff has that respawn rescheduled instead
    /// of gaining a second one. Returns the new id when the fork happened
    /// immediately.
    pub async fn restart_worker(&mut self, id: WorkerId) -> PoolResult<Option<WorkerId>> {
        let history = if let Some(mut slot) = self.slots.remove(&id) {
            slot.cancel_timers();
            slot.record.advance(WorkerStatus::Dead);
            slot.handle.kill();
            self.metrics.unregister(id);
            self.retired.insert(id, slot.handle);
            debug!(worker = id, "worker retired");
            slot.history
        } else if let Some(pending) = self.pending.get(&id) {
            pending.history
        } else {
            debug!(worker = id, "restart requested for unknown worker");
            return Ok(None);
        };
        self.respawn(id, history).await
    }

    async fn respawn(
        &mut self,
        previous: WorkerId,
        mut history: RestartHistory,
    ) -> PoolResult<Option<WorkerId>> {
        if let Some(superseded) = self.pending.remove(&previous) {
            superseded.timer.abort();
            debug!(worker = previous, "pending respawn superseded");
        }
        if !self.accepting {
            debug!(worker = previous, "not respawning during shutdown");
            return Ok(None);
        }

        let count = history.record(Instant::now(), self.settings.restart.window);
        self.metrics.record_restart();

        if let Some(delay) = self.settings.restart.delay_for(count) {
            warn!(
                worker = previous,
                restart_count = count,
                delay_ms = delay.as_millis() as u64,
                "worker is crash-looping, delaying respawn"
            );
            let timer = arm_timer(delay, &self.events, PoolEvent::RespawnDue { previous });
            self.pending.insert(previous, PendingRespawn { timer, history });
            return Ok(None);
        }

        let id = self.start_with(history).await?;
        info!(replaced = previous, worker = id, restart_count = count, "worker restarted");
        Ok(Some(id))
    }

    /// Stop accepting new workers and gracefully stop every live one.
    ///
    /// Returns how many workers were asked to drain.
    pub fn begin_shutdown(&mut self) -> usize {
        self.accepting = false;
        for (previous, pending) in self.pending.drain() {
            pending.timer.abort();
            debug!(worker = previous, "pending respawn cancelled");
        }
        let live: Vec<WorkerId> = self
            .slots
            .values()
            .filter(|s| s.record.is_live())
            .map(|s| s.record.id)
            .collect();
        for id in &live {
            self.stop_worker(*id, true);
        }
        live.len()
    }

    /// Kill every worker still around. Returns the ids that were tracked.
    pub fn force_kill_remaining(&mut self) -> Vec<WorkerId> {
        let mut killed = Vec::with_capacity(self.slots.len());
        for slot in self.slots.values_mut() {
            slot.cancel_timers();
            slot.handle.kill();
            killed.push(slot.record.id);
        }
        for handle in self.retired.values() {
            handle.kill();
        }
        killed
    }

    /// Send a message to every Online worker. Returns how many got it.
    pub fn broadcast(&self, message: &MasterMessage) -> usize {
        self.slots
            .values()
            .filter(|s| s.record.status == WorkerStatus::Online)
            .filter(|s| s.handle.send(message.clone()))
            .count()
    }

    /// Count an unresponsive worker as a crash.
    pub fn note_crash(&mut self) {
        self.metrics.record_crash();
    }

    // ── Events ────────────────────────────────────────────────────

    pub async fn handle_event(&mut self, event: PoolEvent) -> PoolResult<()> {
        match event {
            PoolEvent::Message { id, message } => {
                self.handle_message(id, message);
                Ok(())
            }
            PoolEvent::Exited { id, exit } => self.handle_exit(id, exit).await,
            PoolEvent::StartTimeout { id } => self.handle_start_timeout(id).await,
            PoolEvent::GraceExpired { id } => {
                self.handle_grace_expired(id);
                Ok(())
            }
            PoolEvent::RespawnDue { previous } => self.handle_respawn_due(previous).await,
        }
    }

    fn handle_message(&mut self, id: WorkerId, message: WorkerMessage) {
        let Some(slot) = self.slots.get_mut(&id) else {
            debug!(worker = id, ?message, "message from untracked worker ignored");
            return;
        };
        match message {
            WorkerMessage::Ready { port } => {
                if slot.record.status != WorkerStatus::Starting {
                    debug!(worker = id, status = ?slot.record.status, "late ready ignored");
                    return;
                }
                slot.record.advance(WorkerStatus::Online);
                slot.addr = Some(SocketAddr::from((Ipv4Addr::LOCALHOST, port)));
                if let Some(t) = slot.start_timer.take() {
                    t.abort();
                }
                self.metrics.heartbeat(id, Instant::now());
                info!(worker = id, port, "worker online");
            }
            WorkerMessage::HealthCheckResponse { .. } => {
                self.metrics.heartbeat(id, Instant::now());
            }
            WorkerMessage::WorkerMetrics {
                cpu_usage,
                memory_usage,
                memory_bytes,
                uptime,
            } => {
                self.metrics
                    .record_sample(id, cpu_usage, memory_usage, memory_bytes, uptime);
            }
            WorkerMessage::RequestComplete {
                response_time,
                error,
            } => {
                self.metrics.record_request(id, response_time, error);
            }
        }
    }

    async fn handle_exit(&mut self, id: WorkerId, exit: WorkerExit) -> PoolResult<()> {
        if self.retired.remove(&id).is_some() {
            debug!(worker = id, %exit, "retired worker exited");
            return Ok(());
        }
        let Some(mut slot) = self.slots.remove(&id) else {
            debug!(worker = id, %exit, "exit of untracked worker ignored");
            return Ok(());
        };
        slot.cancel_timers();
        self.metrics.unregister(id);

        if slot.record.status == WorkerStatus::Draining {
            info!(worker = id, %exit, "worker stopped");
            return Ok(());
        }
        slot.record.advance(WorkerStatus::Dead);

        if !exit.is_clean() {
            let err = ClusterError::WorkerCrash { id, exit };
            error!(worker = id, error = %err, "worker crashed");
            self.metrics.record_crash();
            self.respawn(id, slot.history).await?;
            return Ok(());
        }

        let live = self.live_count();
        if live < self.settings.min_workers {
            info!(worker = id, live, min = self.settings.min_workers, "worker exited cleanly, replacing");
            self.respawn(id, slot.history).await?;
        } else {
            info!(worker = id, live, "worker exited cleanly");
        }
        Ok(())
    }

    async fn handle_start_timeout(&mut self, id: WorkerId) -> PoolResult<()> {
        let starting = self
            .slots
            .get(&id)
            .is_some_and(|s| s.record.status == WorkerStatus::Starting);
        if !starting {
            return Ok(());
        }
        let err = ClusterError::WorkerStartTimeout {
            id,
            timeout: self.settings.start_timeout,
        };
        warn!(worker = id, error = %err, "worker never became ready");
        self.restart_worker(id).await?;
        Ok(())
    }

    fn handle_grace_expired(&mut self, id: WorkerId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            if slot.record.status == WorkerStatus::Draining {
                slot.grace_timer = None;
                slot.handle.kill();
                warn!(worker = id, "grace period expired, killing worker");
            }
        }
    }

    async fn handle_respawn_due(&mut self, previous: WorkerId) -> PoolResult<()> {
        let Some(pending) = self.pending.remove(&previous) else {
            return Ok(());
        };
        if !self.accepting {
            return Ok(());
        }
        let id = self.start_with(pending.history).await?;
        info!(replaced = previous, worker = id, restart_count = pending.history.count(), "delayed respawn completed");
        Ok(())
    }

    // ── Views ─────────────────────────────────────────────────────

    /// Starting plus Online workers.
    pub fn live_count(&self) -> u32 {
        self.slots.values().filter(|s| s.record.is_live()).count() as u32
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// No tracked or retired worker is left.
    pub fn is_drained(&self) -> bool {
        self.slots.is_empty() && self.retired.is_empty()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn record(&self, id: WorkerId) -> Option<&WorkerRecord> {
        self.slots.get(&id).map(|s| &s.record)
    }

    pub fn records(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.slots.values().map(|s| &s.record)
    }

    /// Every tracked worker with its stats, in id order.
    pub fn workers(&self) -> impl Iterator<Item = (&WorkerRecord, &WorkerStats)> {
        self.slots
            .values()
            .filter_map(|s| self.metrics.get(s.record.id).map(|st| (&s.record, st)))
    }

    /// Stats of Online workers.
    pub fn online_stats(&self) -> Vec<(WorkerId, &WorkerStats)> {
        self.workers()
            .filter(|(r, _)| r.status == WorkerStatus::Online)
            .map(|(r, s)| (r.id, s))
            .collect()
    }

    /// Routable workers, in id order.
    pub fn backends(&self) -> Vec<Backend> {
        self.slots
            .values()
            .filter(|s| s.record.status == WorkerStatus::Online)
            .filter_map(|s| {
                s.addr.map(|addr| Backend {
                    worker_id: s.record.id,
                    addr,
                })
            })
            .collect()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Workers whose replacement is waiting out a backoff.
    pub fn pending_respawns(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }
}

/// Post `event` once `delay` has elapsed. Abort the handle to cancel.
fn arm_timer(delay: Duration, events: &PoolEventSender, event: PoolEvent) -> JoinHandle<()> {
    let events = events.clone();
    let deadline = Instant::now() + delay;
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        let _ = events.send(event);
    })
}
