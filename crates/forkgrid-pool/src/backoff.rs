//! Crash-loop protection for worker respawns.
//!
//! Every worker carries the `RestartHistory` of the lineage it belongs to:
//! a replacement inherits the history of the worker it replaced. Once the
//! lineage restarts more than `max_restarts` times inside `window`, each
//! further respawn waits `backoff` before forking.

use std::time::Duration;

use tokio::time::Instant;

use forkgrid_core::config::PoolConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub window: Duration,
    pub backoff: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            window: config.restart_window,
            backoff: config.restart_backoff,
        }
    }

    /// Delay before respawning a lineage that has restarted `count` times.
    pub fn delay_for(&self, count: u32) -> Option<Duration> {
        (count > self.max_restarts).then_some(self.backoff)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

/// Restart count of one worker lineage inside the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartHistory {
    count: u32,
    window_start: Option<Instant>,
}

impl RestartHistory {
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Count one more restart at `now` and return the new total.
    ///
    /// The window opens at the first restart and the count starts over once
    /// `window` has elapsed since then.
    pub fn record(&mut self, now: Instant, window: Duration) -> u32 {
        if let Some(start) = self.window_start {
            if now.saturating_duration_since(start) > window {
                self.count = 0;
                self.window_start = None;
            }
        }
        self.window_start.get_or_insert(now);
        self.count += 1;
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_only_past_the_limit() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.delay_for(5), None);
        assert_eq!(policy.delay_for(6), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn counts_within_window() {
        let mut history = RestartHistory::default();
        let window = Duration::from_secs(300);
        for expected in 1..=6 {
            assert_eq!(history.record(Instant::now(), window), expected);
            tokio::time::advance(Duration::from_secs(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_count() {
        let mut history = RestartHistory::default();
        let window = Duration::from_secs(300);
        history.record(Instant::now(), window);
        history.record(Instant::now(), window);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(history.record(Instant::now(), window), 1);
        assert_eq!(history.count(), 1);
    }
}
