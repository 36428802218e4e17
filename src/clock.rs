use crate::types::Epoch;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Software wall clock anchored to the tokio monotonic clock.
///
/// Reading it never blocks and follows `tokio::time::pause()` in tests.
/// Only the time-sync chain steps it; everything else reads.
#[derive(Debug, Clone)]
pub struct WallClock {
    anchor_epoch_ms: i64,
    anchor: Instant,
}

impl WallClock {
    /// Start from the host's system time.
    #[must_use]
    pub fn from_system_time() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self::at_epoch_millis(epoch_ms)
    }

    #[must_use]
    pub fn at_epoch(epoch: Epoch) -> Self {
        Self::at_epoch_millis(epoch * 1000)
    }

    #[must_use]
    pub fn at_epoch_millis(epoch_ms: i64) -> Self {
        Self {
            anchor_epoch_ms: epoch_ms,
            anchor: Instant::now(),
        }
    }

    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.anchor_epoch_ms + self.anchor.elapsed().as_millis() as i64
    }

    #[must_use]
    pub fn now(&self) -> Epoch {
        self.now_millis().div_euclid(1000)
    }

    /// Step the clock; returns the applied jump in milliseconds.
    pub fn set_epoch(&mut self, epoch: Epoch) -> i64 {
        let before = self.now_millis();
        self.anchor_epoch_ms = epoch * 1000;
        self.anchor = Instant::now();
        self.anchor_epoch_ms - before
    }

    /// Monotonic instant at which the wall clock will read `epoch`.
    #[must_use]
    pub fn instant_at(&self, epoch: Epoch) -> Instant {
        let delta_ms = epoch * 1000 - self.now_millis();
        let now = Instant::now();
        if delta_ms <= 0 {
            now
        } else {
            now + std::time::Duration::from_millis(delta_ms as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_clock_advances_with_tokio_time() {
        let clock = WallClock::at_epoch(1_000);
        assert_eq!(clock.now(), 1_000);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(clock.now_millis(), 1_002_500);
        assert_eq!(clock.now(), 1_002);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_epoch_reports_jump() {
        let mut clock = WallClock::at_epoch(1_000);
        let jump = clock.set_epoch(900);
        assert_eq!(jump, -100_000);
        assert_eq!(clock.now(), 900);
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_at() {
        let clock = WallClock::at_epoch(1_000);
        let target = clock.instant_at(1_030);
        assert_eq!(target - Instant::now(), Duration::from_secs(30));
        assert_eq!(clock.instant_at(10), Instant::now());
    }
}
