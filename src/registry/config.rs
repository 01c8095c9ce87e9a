//! Aggregator configuration

use std::time::Duration;

use crate::protocol::constants::DEFAULT_LIVE_DELAY_STEPS;

/// Configuration shared by every aggregator of a server
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Steps a live viewer trails behind the head of an unfinished game
    pub live_delay_steps: u32,

    /// How often delivery actors poll the timeline for new steps
    pub poll_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            live_delay_steps: DEFAULT_LIVE_DELAY_STEPS,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl AggregatorConfig {
    /// Set the live viewer delay
    pub fn live_delay_steps(mut self, steps: u32) -> Self {
        self.live_delay_steps = steps;
        self
    }

    /// Set the delivery poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AggregatorConfig::default();
        assert_eq!(config.live_delay_steps, 3000);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_builder_chaining() {
        let config = AggregatorConfig::default()
            .live_delay_steps(5)
            .poll_interval(Duration::from_millis(10));
        assert_eq!(config.live_delay_steps, 5);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }
}
