//! Realtime connection settings.

use std::time::Duration;

/// Tuning knobs of the realtime connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Deadline for the server to acknowledge a new connection.
    pub max_connect_timeout: Duration,

    /// Delays between reconnect attempts. The last one repeats once exhausted.
    pub reconnect_intervals: Vec<Duration>,

    /// Reconnect attempts before the connection is given up.
    pub max_reconnect_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_connect_timeout: Duration::from_millis(15_000),
            reconnect_intervals: [200, 300, 500, 1000, 1200, 1500, 2000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            max_reconnect_attempts: u32::MAX,
        }
    }
}

impl RealtimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_connect_timeout(mut self, timeout: Duration) -> Self {
        self.max_connect_timeout = timeout;
        self
    }

    pub fn reconnect_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.reconnect_intervals = intervals;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Returns the delay before the given (zero based) reconnect attempt.
    pub(crate) fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_intervals
            .get(attempt as usize)
            .or_else(|| self.reconnect_intervals.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_repeats_last_interval() {
        let config = RealtimeConfig::default();
        assert_eq!(config.reconnect_delay(0), Duration::from_millis(200));
        assert_eq!(config.reconnect_delay(6), Duration::from_millis(2000));
        assert_eq!(config.reconnect_delay(100), Duration::from_millis(2000));

        let empty = RealtimeConfig::new().reconnect_intervals(vec![]);
        assert_eq!(empty.reconnect_delay(3), Duration::ZERO);
    }
}
