use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::generation::error::GenerationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Total generation attempts per window, first call included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default)]
    pub reprompt_on_parse_failure: bool,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            reprompt_on_parse_failure: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone)]
pub struct ReliabilityLayer {
    config: ReliabilityConfig,
}

impl ReliabilityLayer {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay before retrying after the given 1-based failed attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms.max(1) as f64;
        let max = self.config.backoff_max_ms.max(1) as f64;
        let exp = attempt.saturating_sub(1).min(30) as i32;
        let without_jitter = (base * 2f64.powi(exp)).min(max);
        let jitter_factor = 0.9 + (attempt as f64 % 3.0) * 0.05;
        Duration::from_millis((without_jitter * jitter_factor) as u64)
    }

    /// `attempts_made` counts calls already issued for this window.
    pub fn can_retry(&self, err: &GenerationError, attempts_made: u32) -> bool {
        err.retryable && attempts_made < self.max_attempts()
    }
}
