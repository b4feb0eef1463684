//! forkgrid-health — liveness tracking for forked workers.
//!
//! The master probes every Online worker with `health_check` on a fixed
//! interval; each `health_check_response` refreshes that worker's
//! heartbeat. The `HealthMonitor` here is pure evaluation: given the
//! records, their stats, and the current instant, it reports which
//! workers have gone silent and whether the cluster as a whole is healthy.
//!
//! # Self-Healing
//!
//! A worker whose heartbeat is older than `heartbeat_timeout` is treated
//! exactly like a crashed one, even if its process is still alive. The
//! master restarts it, which retires the old record, so the next sweep
//! cannot report it a second time.

pub mod monitor;

pub use monitor::{HealthMonitor, Unresponsive, cluster_is_healthy};
