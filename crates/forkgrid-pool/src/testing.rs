//! In-memory spawner for driving the pool without real processes.
//!
//! Every spawn hands a `SpawnedWorker` to the test through a `SpawnLog`.
//! The test then plays the worker's part: announce readiness, answer
//! health checks, exit with a chosen status.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use forkgrid_core::{ClusterError, MasterMessage, WorkerExit, WorkerId, WorkerMessage};

use crate::error::PoolError;
use crate::event::{PoolEvent, PoolEventSender};
use crate::spawner::{Spawner, WorkerControl, WorkerHandle};

/// A `Spawner` that creates no processes.
#[derive(Debug, Clone)]
pub struct ManualSpawner {
    spawned: mpsc::UnboundedSender<SpawnedWorker>,
    allowed: Arc<AtomicU32>,
    next_pid: Arc<AtomicU32>,
}

/// Receives the workers a `ManualSpawner` "forked".
#[derive(Debug)]
pub struct SpawnLog {
    spawned: mpsc::UnboundedReceiver<SpawnedWorker>,
    allowed: Arc<AtomicU32>,
}

/// Spawns left before `ManualSpawner` starts refusing. `MAX` is unlimited.
const UNLIMITED: u32 = u32::MAX;

impl ManualSpawner {
    pub fn new() -> (Self, SpawnLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        let allowed = Arc::new(AtomicU32::new(UNLIMITED));
        (
            Self {
                spawned: tx,
                allowed: Arc::clone(&allowed),
                next_pid: Arc::new(AtomicU32::new(1000)),
            },
            SpawnLog { spawned: rx, allowed },
        )
    }
}

impl Spawner for ManualSpawner {
    async fn spawn(
        &mut self,
        id: WorkerId,
        events: PoolEventSender,
    ) -> Result<WorkerHandle, PoolError> {
        let granted = self
            .allowed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                UNLIMITED => Some(UNLIMITED),
                n => Some(n - 1),
            });
        if granted.is_err() {
            return Err(ClusterError::Spawn(std::io::Error::other("fork refused")).into());
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let _ = self.spawned.send(SpawnedWorker {
            id,
            pid,
            events,
            control: control_rx,
        });
        Ok(WorkerHandle::new(Some(pid), control_tx))
    }
}

impl SpawnLog {
    /// The next worker spawned so far, if any.
    pub fn try_next(&mut self) -> Option<SpawnedWorker> {
        self.spawned.try_recv().ok()
    }

    /// Every worker spawned since the last call.
    pub fn drain(&mut self) -> Vec<SpawnedWorker> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Make every following spawn fail until cleared.
    pub fn fail_spawns(&self, fail: bool) {
        let allowed = if fail { 0 } else { UNLIMITED };
        self.allowed.store(allowed, Ordering::SeqCst);
    }

    /// Let `count` more spawns succeed, then fail every one after.
    pub fn fail_spawns_after(&self, count: u32) {
        self.allowed.store(count, Ordering::SeqCst);
    }
}

/// The test's end of one fake worker.
#[derive(Debug)]
pub struct SpawnedWorker {
    pub id: WorkerId,
    pub pid: u32,
    events: PoolEventSender,
    control: mpsc::UnboundedReceiver<WorkerControl>,
}

impl SpawnedWorker {
    pub fn send(&self, message: WorkerMessage) {
        let _ = self.events.send(PoolEvent::Message {
            id: self.id,
            message,
        });
    }

    pub fn ready(&self, port: u16) {
        self.send(WorkerMessage::Ready { port });
    }

    pub fn report(&self, cpu_usage: f64, memory_usage: f64) {
        self.send(WorkerMessage::WorkerMetrics {
            cpu_usage,
            memory_usage,
            memory_bytes: 0,
            uptime: 1.0,
        });
    }

    pub fn exit(&self, exit: WorkerExit) {
        let _ = self.events.send(PoolEvent::Exited { id: self.id, exit });
    }

    /// The next pending control instruction, without waiting.
    pub fn try_control(&mut self) -> Option<WorkerControl> {
        self.control.try_recv().ok()
    }

    /// Every pending control instruction.
    pub fn controls(&mut self) -> Vec<WorkerControl> {
        std::iter::from_fn(|| self.try_control()).collect()
    }

    pub async fn next_control(&mut self) -> Option<WorkerControl> {
        self.control.recv().await
    }

    /// Answer health checks, exit 0 on `shutdown`, die by signal on kill.
    pub fn behave(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(control) = self.next_control().await {
                match control {
                    WorkerControl::Send(MasterMessage::HealthCheck { timestamp }) => {
                        self.send(WorkerMessage::HealthCheckResponse { timestamp });
                    }
                    WorkerControl::Send(MasterMessage::Shutdown) => {
                        self.exit(WorkerExit::Code(0));
                        return;
                    }
                    WorkerControl::Kill => {
                        self.exit(WorkerExit::Signal(9));
                        return;
                    }
                }
            }
        })
    }

    /// Ignore `shutdown`; only a kill ends it.
    pub fn stubborn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(control) = self.next_control().await {
                if control == WorkerControl::Kill {
                    self.exit(WorkerExit::Signal(9));
                    return;
                }
            }
        })
    }

    /// Ignore everything, including kills. Returns the kills it swallowed.
    pub fn hung(mut self) -> JoinHandle<u32> {
        tokio::spawn(async move {
            let mut kills = 0;
            while let Some(control) = self.next_control().await {
                if control == WorkerControl::Kill {
                    kills += 1;
                }
            }
            kills
        })
    }
}
