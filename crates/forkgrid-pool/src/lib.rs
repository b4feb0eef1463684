//! forkgrid-pool — the worker pool manager.
//!
//! Owns every worker record, the matching stats entry, and the control
//! channel to each worker process. All mutation happens through
//! `&mut WorkerPool`, which the master drives from its single event loop.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool<S: Spawner>
//!   ├── start_worker()            → Spawner::spawn → WorkerRecord(Starting)
//!   ├── stop_worker(id, graceful) → Draining, shutdown + grace timer
//!   ├── restart_worker(id)        → retire, then respawn now or after backoff
//!   └── handle_event(PoolEvent)   ← worker messages, exits, timer expiries
//! ```
//!
//! Every wait is a timer task that posts a `PoolEvent` back into the same
//! channel the workers report on, so the pool never blocks.

pub mod backoff;
pub mod error;
pub mod event;
pub mod pool;
pub mod spawner;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backoff::{RestartHistory, RestartPolicy};
pub use error::PoolError;
pub use event::{PoolEvent, PoolEventReceiver, PoolEventSender};
pub use pool::{PoolSettings, WorkerPool};
pub use spawner::{ProcessSpawner, Spawner, WORKER_ID_ENV, WorkerControl, WorkerHandle};
