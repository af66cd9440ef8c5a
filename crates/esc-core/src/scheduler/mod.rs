//! Harvest and analysis loops
//!
//! Both loops tick on a [`Ticker`] and stop on a fixed deadline derived
//! from the execution time, or earlier on the instance shutdown signal.
//! Neither loop waits for the submissions it hands to the guard.

mod analysis;
mod harvest;

pub use analysis::AnalysisScheduler;
pub use harvest::HarvestScheduler;

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Harvest loop stops this long after the execution time
pub const HARVEST_STOP_SLACK: Duration = Duration::from_millis(100);
/// Analysis loop stops this long after the execution time (from its own start)
pub const ANALYSIS_STOP_SLACK: Duration = Duration::from_millis(500);

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Periodic tick with a single active period
///
/// The first tick fires one full period after creation or reschedule.
#[derive(Debug)]
pub struct Ticker {
    interval: Interval,
    period: Duration,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, period }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    /// Drop the current period and restart at `period` from now
    pub fn reschedule(&mut self, period: Duration) {
        *self = Self::new(period);
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
