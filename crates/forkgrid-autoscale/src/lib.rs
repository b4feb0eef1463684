//! forkgrid-autoscale — metrics-driven pool sizing.
//!
//! On every tick the master hands the autoscaler the live worker count
//! and the stats of its Online workers. The autoscaler answers with at
//! most one action: start one worker, drain one named worker, or nothing.
//!
//! # Hysteresis
//!
//! ```text
//!   scale up    any average above its threshold
//!   hold        anywhere in between
//!   scale down  every average below half its threshold
//! ```
//!
//! A scale-down is additionally suppressed for `scale_down_cooldown`
//! after the last scale-up, so a freshly started worker gets a chance to
//! absorb load before the pool shrinks again.

pub mod scaler;

pub use scaler::{Autoscaler, FleetAverages, ScaleDecision};
