//! Error taxonomy for the cluster manager.

use std::time::Duration;

use thiserror::Error;

use crate::types::{WorkerExit, WorkerId};

/// Failures the master observes while supervising workers.
///
/// All variants except `Spawn` are recovered locally (restart or forced
/// termination) and only surface through logs and metrics.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("worker {id} did not acknowledge readiness within {timeout:?}")]
    WorkerStartTimeout { id: WorkerId, timeout: Duration },

    #[error("worker {id} crashed: {exit}")]
    WorkerCrash { id: WorkerId, exit: WorkerExit },

    #[error("worker {id} unresponsive for {silent_for:?}")]
    WorkerUnresponsive { id: WorkerId, silent_for: Duration },

    #[error("scaling computation failed: {0}")]
    ScalingComputation(String),

    #[error("worker {id} still running after the shutdown timeout")]
    ShutdownTimeout { id: WorkerId },

    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Errors on the IPC channel between master and worker.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("ipc i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode ipc message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed ipc message {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}
