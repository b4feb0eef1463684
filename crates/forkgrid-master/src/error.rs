//! Master error types.

use thiserror::Error;

use forkgrid_pool::PoolError;

/// Errors that end the master's run loop.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("worker pool failure: {0}")]
    Pool(#[from] PoolError),
}

impl MasterError {
    /// Whether the master has to stop. Anything else costs one tick.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Pool(e) => e.is_fatal(),
        }
    }
}
