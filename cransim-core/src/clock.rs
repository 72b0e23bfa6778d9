//! # Virtual Clock
//!
//! Maps wall-clock "now" onto archive time by subtracting a fixed offset,
//! so that the archive day for "today" is one that has already been written.
//!
//! ## Expectations:
//! - Stateless apart from the offset; no failure mode
//! - UTC throughout
//! - Monotonic with the underlying wall clock

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tokio::time::Instant;

/// Source of real (unshifted) time.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A wall clock anchored at a fixed UTC instant and advanced by tokio's
/// monotonic clock. Under a paused tokio runtime it only moves when the
/// runtime's time does.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: DateTime<Utc>,
    start: Instant,
}

impl MonotonicClock {
    pub fn anchored_at(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            start: Instant::now(),
        }
    }
}

impl WallClock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        self.epoch + TimeDelta::from_std(self.start.elapsed()).unwrap_or_default()
    }
}

/// Wall time shifted back by a fixed offset.
#[derive(Clone)]
pub struct VirtualClock {
    offset: TimeDelta,
    wall: Arc<dyn WallClock>,
}

impl VirtualClock {
    /// Creates a clock over the system wall clock.
    pub fn new(offset: TimeDelta) -> Self {
        Self::with_wall_clock(offset, SystemClock)
    }

    pub fn from_days(days: u32) -> Self {
        Self::new(TimeDelta::days(i64::from(days)))
    }

    pub fn with_wall_clock(offset: TimeDelta, wall: impl WallClock + 'static) -> Self {
        Self {
            offset,
            wall: Arc::new(wall),
        }
    }

    /// Returns the current virtual time.
    #[inline]
    pub fn now(&self) -> DateTime<Utc> {
        self.wall.now() - self.offset
    }

    /// The archive day virtual "now" falls on.
    #[inline]
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    pub fn offset(&self) -> TimeDelta {
        self.offset
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualClock")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 29, 0, 30, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_applies_offset() {
        let clock = VirtualClock::with_wall_clock(
            TimeDelta::days(28),
            MonotonicClock::anchored_at(epoch()),
        );
        assert_eq!(
            clock.now(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap()
        );
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_runtime_time() {
        let clock =
            VirtualClock::with_wall_clock(TimeDelta::days(1), MonotonicClock::anchored_at(epoch()));
        let before = clock.now();
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now() - before, TimeDelta::seconds(90));
    }

    #[test]
    fn test_system_clock_is_shifted() {
        let clock = VirtualClock::from_days(28);
        let shifted = clock.now();
        let lag = Utc::now() - shifted;
        assert!(lag >= TimeDelta::days(28));
        assert!(lag < TimeDelta::days(28) + TimeDelta::seconds(5));
    }
}
