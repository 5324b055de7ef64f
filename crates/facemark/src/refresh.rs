//! Display refresh signal driving the detection loop.

use std::time::Duration;
use tokio::time::{self, Interval, MissedTickBehavior};

/// Source of display refresh ticks.
#[allow(async_fn_in_trait)]
pub trait RefreshSignal {
    /// Wait for the next refresh. Returns false once the display is gone and
    /// no further ticks will come.
    async fn next_refresh(&mut self) -> bool;
}

/// Fixed-rate refresh. Late ticks are skipped rather than bunched, so at
/// most one loop iteration runs per refresh period.
pub struct IntervalRefresh {
    interval: Interval,
}

impl IntervalRefresh {
    pub fn new(hz: f64) -> Self {
        let hz = if hz.is_finite() && hz > 0.0 { hz } else { 60.0 };
        let mut interval = time::interval(Duration::from_secs_f64(1.0 / hz));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

impl RefreshSignal for IntervalRefresh {
    async fn next_refresh(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}
