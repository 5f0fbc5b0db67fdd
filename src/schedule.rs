//! Minute-boundary scheduling
//!
//! The pipeline cadence comes from one place: `MinuteAligner::wait_for_boundary`
//! suspends until the next wall-clock minute starts. Time is read through the
//! `Clock` trait so tests can drive the loop with a fake clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Wall-clock source plus the ability to suspend on it
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Real time: `Utc::now` and `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// First whole minute strictly after `now`
pub fn next_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let next = (now.timestamp().div_euclid(60) + 1) * 60;
    DateTime::<Utc>::from_timestamp(next, 0).unwrap_or(now + chrono::Duration::seconds(60))
}

/// Time left until the next minute starts; always in `(0, 60s]`
pub fn delay_until_next_minute(now: DateTime<Utc>) -> Duration {
    (next_minute_boundary(now) - now)
        .to_std()
        .unwrap_or(Duration::from_secs(60))
}

pub struct MinuteAligner {
    clock: Arc<dyn Clock>,
}

impl MinuteAligner {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Suspend until the next minute boundary and return it.
    ///
    /// The target is fixed before sleeping and the wait only ends once the
    /// clock has reached it, so an early wake-up sleeps again for the
    /// remainder instead of firing twice for the same minute.
    pub async fn wait_for_boundary(&self) -> DateTime<Utc> {
        let target = next_minute_boundary(self.clock.now());
        loop {
            let now = self.clock.now();
            if now >= target {
                return target;
            }
            let remaining = (target - now).to_std().unwrap_or(Duration::ZERO);
            tracing::trace!(target = %target, remaining_ms = remaining.as_millis() as u64, "Waiting for minute boundary");
            self.clock.sleep(remaining).await;
        }
    }
}
