//! Monitoring timer
//!
//! A deadline plus a fixed-interval ticker. Each call to [`Monitor::tick`]
//! suspends the caller's task until the next poll is due or the deadline
//! passes; no thread is held while waiting.

use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

/// What the monitoring loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Query the platform
    Poll,

    /// The monitoring timeout elapsed
    TimedOut,
}

/// Monitoring schedule for one deployment
pub struct Monitor {
    deadline: Instant,
    ticker: Interval,
    poll_now: bool,
}

impl Monitor {
    /// First poll after one interval; times out `timeout` from now
    pub fn start(interval: Duration, timeout: Duration) -> Self {
        Self::build(interval, timeout, false)
    }

    /// First poll immediately, regardless of the deadline; used after a
    /// restart so the platform is re-queried before any other action
    pub fn resume(interval: Duration, remaining: Duration) -> Self {
        Self::build(interval, remaining, true)
    }

    fn build(interval: Duration, timeout: Duration, poll_now: bool) -> Self {
        let now = Instant::now();
        let mut ticker = interval_at(now + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            deadline: now + timeout,
            ticker,
            poll_now,
        }
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Wait for the next poll or the deadline.
    ///
    /// When both are due at once the deadline wins: a status is only
    /// accepted if it was observed before the timeout was.
    pub async fn tick(&mut self) -> Tick {
        if self.poll_now {
            self.poll_now = false;
            return Tick::Poll;
        }

        tokio::select! {
            biased;
            _ = sleep_until(self.deadline) => Tick::TimedOut,
            _ = self.ticker.tick() => Tick::Poll,
        }
    }
}
