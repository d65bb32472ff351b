//! Monotonic time primitive used for freshness and pagination TTL math.
//!
//! `std::time::Instant` can't be constructed from a fixed value or serialized,
//! which makes deterministic tests awkward. `Instant` here is a thin
//! milliseconds-since-epoch newtype; `ClockSource` is the swappable source of
//! "now", mirroring the teacher's `ClockSource` trait for its hybrid logical
//! clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// A point in time, expressed as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Instant(pub u64);

impl Instant {
    /// The zero instant (epoch).
    pub const ZERO: Instant = Instant(0);

    /// Milliseconds elapsed from `earlier` to `self`, saturating at zero if `self < earlier`.
    #[must_use]
    pub fn saturating_since(self, earlier: Instant) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// `self + millis`, saturating at `u64::MAX`.
    #[must_use]
    pub fn plus_millis(self, millis: u64) -> Instant {
        Instant(self.0.saturating_add(millis))
    }
}

/// A swappable source of "now", so freshness/TTL logic is deterministic in tests.
pub trait ClockSource: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// The real wall-clock source, backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> Instant {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Instant(millis)
    }
}

/// A manually-advanced clock, for deterministic freshness/TTL tests.
#[derive(Debug)]
pub struct FakeClock {
    now: std::sync::atomic::AtomicU64,
}

impl FakeClock {
    /// Create a fake clock starting at `start`.
    #[must_use]
    pub fn new(start: Instant) -> Self {
        Self {
            now: std::sync::atomic::AtomicU64::new(start.0),
        }
    }

    /// Advance the clock by `millis`.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, std::sync::atomic::Ordering::SeqCst);
    }

    /// Set the clock to an absolute instant.
    pub fn set(&self, at: Instant) {
        self.now.store(at.0, std::sync::atomic::Ordering::SeqCst);
    }
}

impl ClockSource for FakeClock {
    fn now(&self) -> Instant {
        Instant(self.now.load(std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_since_never_underflows() {
        let a = Instant(10);
        let b = Instant(20);
        assert_eq!(a.saturating_since(b), 0);
        assert_eq!(b.saturating_since(a), 10);
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = clock.now();
        assert!(b >= a);
    }
}
