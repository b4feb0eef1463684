//! forkgrid-metrics — observability for the worker pool.
//!
//! Keeps one `WorkerStats` entry per tracked worker, fed by the
//! `worker_metrics` and `request_complete` IPC messages, and derives
//! fleet-wide aggregates from them.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── register() / unregister()   ← in lockstep with worker records
//!   ├── record_sample()             ← worker_metrics
//!   ├── record_request()            ← request_complete
//!   ├── heartbeat()                 ← health_check_response
//!   └── summary() → FleetSummary
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics/prometheus
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::MetricsCollector;
pub use prometheus::render_prometheus;
