//! Worker error types.

use thiserror::Error;

use forkgrid_core::IpcError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("ipc with master failed: {0}")]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    App(#[from] anyhow::Error),
}
