//! Exponential reconnect backoff

use std::time::Duration;

/// Doubling delay between a floor and a ceiling
///
/// With a floor of 1s and a ceiling of 16s successive delays are
/// `1, 2, 4, 8, 16, 16, ...` seconds until [`Backoff::reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `floor`
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay the next reconnect would wait
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the current delay and double it for next time
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    /// Back to the floor, after a successful open
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(16))
    }
}
