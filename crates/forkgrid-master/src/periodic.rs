//! Cancellable periodic tasks on tokio's clock.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::debug;

/// A fixed-period tick source for `select!` loops.
///
/// The first tick fires one full period after creation. Once cancelled,
/// `tick` never completes again, so a `select!` branch on it goes quiet
/// without being removed.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    interval: Option<Interval>,
}

impl PeriodicTask {
    pub fn new(name: &'static str, period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            name,
            interval: Some(interval),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the next tick.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }

    pub fn cancel(&mut self) {
        if self.interval.take().is_some() {
            debug!(task = self.name, "periodic task cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.interval.is_none()
    }
}
