//! Reconnection backoff.

use std::time::Duration;

/// How the delay grows between consecutive failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// Same delay every time.
    Fixed,
    /// `base * attempt`.
    Linear,
}

/// Configuration for reconnection backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    pub growth: Growth,
}

impl ReconnectConfig {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            growth: Growth::Fixed,
        }
    }

    pub fn linear(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            growth: Growth::Linear,
        }
    }
}

/// Tracks reconnection state and calculates delays.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Returns the delay to wait before the next attempt and counts the attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);

        let delay = match self.config.growth {
            Growth::Fixed => self.config.base_delay,
            Growth::Linear => self.config.base_delay.saturating_mul(self.attempts),
        };

        delay.min(self.config.max_delay)
    }

    /// Reset state after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Get current attempt count.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff_is_capped() {
        let mut state = ReconnectState::new(ReconnectConfig::linear(
            Duration::from_secs(10),
            Duration::from_secs(25),
        ));
        assert_eq!(state.next_delay(), Duration::from_secs(10));
        assert_eq!(state.next_delay(), Duration::from_secs(20));
        assert_eq!(state.next_delay(), Duration::from_secs(25));
        assert_eq!(state.next_delay(), Duration::from_secs(25));
        assert_eq!(state.attempts(), 4);
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut state = ReconnectState::new(ReconnectConfig::linear(
            Duration::from_secs(10),
            Duration::from_secs(300),
        ));
        state.next_delay();
        state.next_delay();
        state.reset();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_fixed_backoff() {
        let mut state = ReconnectState::new(ReconnectConfig::fixed(Duration::from_secs(10)));
        for _ in 0..5 {
            assert_eq!(state.next_delay(), Duration::from_secs(10));
        }
    }
}
