use rand::Rng;
use std::time::Duration;

/// Retry schedule for a single fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(800),
            multiplier: 1.8,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based: the wait after the first failure).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff_delay(attempt, self.base_delay, self.multiplier)
    }
}

/// Calculate exponential backoff delay with jitter
pub fn calculate_backoff_delay(attempt: u32, base_delay: Duration, multiplier: f64) -> Duration {
    // Cap the exponent so a misconfigured attempt count cannot overflow
    let capped_attempt = attempt.min(10) as i32;

    let base_secs = base_delay.as_secs_f64() * multiplier.max(1.0).powi(capped_attempt);

    // Add jitter: ±20% randomness
    let jitter_factor = rand::thread_rng().gen_range(0.8..1.2);

    Duration::from_secs_f64(base_secs * jitter_factor)
}
