//! Events the pool reacts to.

use tokio::sync::mpsc;

use forkgrid_core::{WorkerExit, WorkerId, WorkerMessage};

/// Everything that can change pool state, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// A decoded IPC message from a worker.
    Message { id: WorkerId, message: WorkerMessage },
    /// The worker's process has exited.
    Exited { id: WorkerId, exit: WorkerExit },
    /// The readiness timer of a Starting worker fired.
    StartTimeout { id: WorkerId },
    /// The grace timer of a Draining worker fired.
    GraceExpired { id: WorkerId },
    /// A delayed respawn replacing `previous` is due.
    RespawnDue { previous: WorkerId },
}

pub type PoolEventSender = mpsc::UnboundedSender<PoolEvent>;
pub type PoolEventReceiver = mpsc::UnboundedReceiver<PoolEvent>;
