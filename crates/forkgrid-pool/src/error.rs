//! Pool error types.

use thiserror::Error;

use forkgrid_core::ClusterError;

#[derive(Debug, Error)]
pub enum PoolError {
    /// Only `ClusterError::Spawn` reaches callers; every other worker
    /// failure is recovered inside the pool.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("worker pool is shutting down, not starting new workers")]
    ShuttingDown,
}

impl PoolError {
    /// A fork failure. The master cannot keep its minimum and must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Cluster(ClusterError::Spawn(_)))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
