//! Reconnect delay policy

use async_trait::async_trait;
use std::time::Duration;

/// Exponential reconnect delay: starts at `floor`, doubles per failure, capped
/// at `ceiling`, back to `floor` after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff {
    /// Create a policy. A ceiling below the floor is raised to the floor.
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            current: floor,
        }
    }

    /// Delay the next call to [`Backoff::next_delay`] will return
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the delay before the next attempt and advance the policy
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    /// Back to the floor
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

/// Source of delays, injectable so reconnect logic runs without real timers
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_doubles_up_to_ceiling() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_secs(4));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_ceiling_below_floor() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    proptest! {
        #[test]
        fn test_delay_stays_within_bounds(floor in 1u64..30, ceiling in 1u64..120, steps in 0usize..40) {
            let mut backoff = Backoff::new(Duration::from_secs(floor), Duration::from_secs(ceiling));
            let mut previous = Duration::ZERO;
            for _ in 0..steps {
                let delay = backoff.next_delay();
                prop_assert!(delay >= Duration::from_secs(floor));
                prop_assert!(delay <= Duration::from_secs(floor.max(ceiling)));
                prop_assert!(delay >= previous);
                previous = delay;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_uses_tokio_clock() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(30)).await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
