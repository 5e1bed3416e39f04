use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for builds that failed before anything was persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, the first included. 1 disables retries.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Exponential backoff before retry number `attempt` (0-based), with
/// ±20% jitter, capped at `max_backoff_ms`.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let max = config.max_backoff_ms as f64;
    let backoff = (config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(exponent)).min(max);

    let jitter = backoff * (rand::random::<f64>() * 0.4 - 0.2);
    let millis = (backoff + jitter).clamp(0.0, max);
    Duration::from_millis(millis as u64)
}
