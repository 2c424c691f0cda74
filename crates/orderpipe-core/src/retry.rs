//! Exponential backoff for bus emission retries.
//!
//! Backoff formula: min(max_delay, base_delay * 2^attempt) with optional ±25% jitter.

use crate::config::PublisherConfig;
use rand::Rng;
use std::time::Duration;

/// Configuration for exponential backoff retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay for first retry (default: 100ms)
    pub base_delay: Duration,
    /// Maximum delay cap (default: 5s)
    pub max_delay: Duration,
    /// Total attempts including the first one (default: 3)
    pub max_attempts: u32,
    /// Whether to add jitter to delays (default: true)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: max_attempts.max(1),
            jitter: true,
        }
    }

    /// Build from publisher configuration.
    pub fn from_publisher(config: &PublisherConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.max_attempts,
        )
    }

    /// Disable jitter (for testing).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped_delay_ms = delay_ms.min(max_ms);

        let final_delay_ms = if self.jitter && capped_delay_ms >= 4 {
            let jitter_range = capped_delay_ms / 4;
            let offset = rand::thread_rng().gen_range(0..=jitter_range * 2);
            capped_delay_ms - jitter_range + offset
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(100));
        assert_eq!(config.max_attempts, 3);
        assert!(config.jitter);
    }

    #[test]
    fn test_exponential_delay_without_jitter() {
        let config = RetryConfig::default().without_jitter();
        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(config.calculate_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = RetryConfig::new(Duration::from_millis(400), Duration::from_secs(10), 5);
        for _ in 0..50 {
            let delay = config.calculate_delay(0).as_millis();
            assert!((300..=500).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_from_publisher_config() {
        let publisher = PublisherConfig {
            max_attempts: 0,
            base_backoff_ms: 10,
            max_backoff_ms: 50,
            ..PublisherConfig::default()
        };
        let config = RetryConfig::from_publisher(&publisher);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.max_delay, Duration::from_millis(50));
    }
}
