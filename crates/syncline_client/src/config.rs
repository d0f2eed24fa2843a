//! Configuration for the sync client.

use std::time::Duration;
use uuid::Uuid;

/// Configuration for a sync client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client group (one install) this client belongs to.
    pub client_group_id: String,
    /// Client (one mutation stream) id.
    pub client_id: String,
    /// Push protocol version sent with every push.
    pub push_version: u32,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(client_group_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client_group_id: client_group_id.into(),
            client_id: client_id.into(),
            push_version: 1,
            retry: RetryConfig::default(),
        }
    }

    /// Creates a configuration with fresh random ids.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string(), Uuid::new_v4().to_string())
    }

    /// Sets the push version.
    pub fn with_push_version(mut self, version: u32) -> Self {
        self.push_version = version;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::generate()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% on top.
            Duration::from_secs_f64(delay + delay * 0.25 * jitter())
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// A value in `[0, 1)` taken from the random bits of a v4 uuid.
fn jitter() -> f64 {
    let bits = Uuid::new_v4().as_u128() as u64;
    (bits % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new("g1", "c1")
            .with_push_version(2)
            .with_retry(RetryConfig::no_retry());

        assert_eq!(config.client_group_id, "g1");
        assert_eq!(config.client_id, "c1");
        assert_eq!(config.push_version, 2);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn generated_ids_differ() {
        let first = ClientConfig::generate();
        let second = ClientConfig::generate();
        assert_ne!(first.client_id, second.client_id);
        assert_ne!(first.client_group_id, first.client_id);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        assert!(config.delay_for_attempt(2) >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
