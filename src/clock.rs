//! Fixed-period sampling driver.
//!
//! One pull per tick, never two in flight. Downstream statistics assume the
//! configured rate, so late ticks are delayed rather than replayed in a burst.

use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{CalibError, Result};

pub struct SampleClock {
    interval: Interval,
    origin: Instant,
    period: Duration,
    ticks: u64,
}

impl SampleClock {
    /// Create a clock ticking every `period` (first tick is immediate).
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            origin: Instant::now(),
            period,
            ticks: 0,
        }
    }

    pub fn from_secs(period_s: f64) -> Self {
        Self::new(Duration::from_secs_f64(period_s))
    }

    /// Wait for the next tick and return seconds since the clock was created.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<f64> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CalibError::Cancelled),
            _ = self.interval.tick() => {
                self.ticks += 1;
                Ok(self.origin.elapsed().as_secs_f64())
            }
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Sleep that aborts with `Cancelled` as soon as the token flips.
pub async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CalibError::Cancelled),
        _ = time::sleep(duration) => Ok(()),
    }
}

pub async fn sleep_secs(secs: f64, cancel: &CancellationToken) -> Result<()> {
    sleep_cancellable(Duration::from_secs_f64(secs.max(0.0)), cancel).await
}
