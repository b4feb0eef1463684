//! forkgrid-master — the orchestrator that owns the worker pool.
//!
//! One `Supervisor` is constructed at process entry. Its `run` loop is
//! the only place pool state changes:
//!
//! ```text
//! Supervisor::run
//!   ├── PoolEvent        ← worker messages, exits, timer expiries
//!   ├── health tick      → stale heartbeats restarted, health_check broadcast
//!   ├── autoscale tick   → at most one start or graceful stop
//!   └── shutdown signal  → ShutdownCoordinator::drain → ShutdownReport
//! ```
//!
//! After every step it republishes a `ClusterReport` and the routable
//! backend list on `watch` channels for the HTTP surface and the proxy.

pub mod error;
pub mod periodic;
pub mod shutdown;
pub mod supervisor;

pub use error::MasterError;
pub use periodic::PeriodicTask;
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use supervisor::Supervisor;
