//! forkgrid-worker — everything that runs inside a forked worker.
//!
//! A worker hosts one `AppServer`, tells the master where it listens,
//! and then serves until the master asks it to stop:
//!
//! ```text
//! master stdin ──▶ run_worker ──▶ AppServer::start → ready {port}
//!                      │ health_check      → health_check_response
//!                      │ every interval    → worker_metrics
//!                      │ each request      → request_complete
//!                      └ shutdown / EOF    → AppServer::stop → exit 0
//! ```
//!
//! stdout is reserved for IPC, so worker logs go to stderr.

pub mod app;
pub mod error;
pub mod runtime;
pub mod sampler;

pub use app::{AppServer, HttpApp, RequestOutcome, demo_router};
pub use error::WorkerError;
pub use runtime::{WorkerOptions, run_worker, run_worker_with_io};
pub use sampler::{ResourceSample, ResourceSampler};
