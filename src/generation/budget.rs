use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
    error::{SummarizeError, budget_exceeded, internal_error},
    generation::GenerationBudget,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Output tokens requested from the generator per window.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u64,
    /// Hard ceiling a single call may request; `None` disables the check.
    #[serde(default)]
    pub max_output_tokens_per_call: Option<u64>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub invocation_timeout_ms: Option<u64>,
    #[serde(default = "default_max_concurrent_windows")]
    pub max_concurrent_windows: u32,
    #[serde(default)]
    pub max_total_tokens: Option<u64>,
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    #[serde(default)]
    pub cost_per_1k_tokens_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: default_max_output_tokens(),
            max_output_tokens_per_call: None,
            request_timeout_ms: default_request_timeout_ms(),
            invocation_timeout_ms: None,
            max_concurrent_windows: default_max_concurrent_windows(),
            max_total_tokens: None,
            max_cost_usd: None,
            cost_per_1k_tokens_usd: 0.0,
        }
    }
}

fn default_max_output_tokens() -> u64 {
    1_024
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_max_concurrent_windows() -> u32 {
    4
}

/// Prompt sizes of one window. `reprompt_tokens` is set when a corrective
/// re-prompt may follow a parse failure, and bounds the largest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCallEstimate {
    pub prompt_tokens: u64,
    pub reprompt_tokens: Option<u64>,
}

/// Worst-case spend of an invocation, computed before any call is made:
/// every prompt exhausts its attempts and every window is re-prompted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetEstimate {
    pub windows: usize,
    pub calls: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

#[derive(Clone)]
pub struct BudgetEnforcer {
    config: BudgetConfig,
    permits: Arc<Semaphore>,
}

#[derive(Debug)]
pub struct BudgetLease {
    pub budget: GenerationBudget,
    _permit: OwnedSemaphorePermit,
}

impl BudgetEnforcer {
    pub fn new(config: BudgetConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_windows.max(1) as usize));
        Self { config, permits }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn max_concurrent_windows(&self) -> usize {
        self.config.max_concurrent_windows.max(1) as usize
    }

    pub fn invocation_deadline(&self) -> Option<Duration> {
        self.config
            .invocation_timeout_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
    }

    pub fn call_budget(&self) -> GenerationBudget {
        GenerationBudget {
            max_tokens: self.config.max_output_tokens,
            timeout: Duration::from_millis(self.config.request_timeout_ms.max(1)),
        }
    }

    pub fn estimate_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / 1_000.0 * self.config.cost_per_1k_tokens_usd.max(0.0)
    }

    /// Rejects an invocation whose worst case would breach a configured
    /// ceiling. `attempts_per_prompt` is the retry ceiling applied to the
    /// first prompt and to the re-prompt separately.
    pub fn preflight(
        &self,
        windows: &[WindowCallEstimate],
        attempts_per_prompt: u32,
    ) -> Result<BudgetEstimate, SummarizeError> {
        if let Some(ceiling) = self.config.max_output_tokens_per_call
            && self.config.max_output_tokens > ceiling
        {
            return Err(budget_exceeded(format!(
                "requested max_output_tokens {} exceeds configured per-call budget {}",
                self.config.max_output_tokens, ceiling
            )));
        }

        let attempts = u64::from(attempts_per_prompt.max(1));
        let per_call = |prompt: u64| {
            prompt
                .saturating_add(self.config.max_output_tokens)
                .saturating_mul(attempts)
        };
        let mut calls = 0u64;
        let mut tokens = 0u64;
        for window in windows {
            calls += attempts;
            tokens = tokens.saturating_add(per_call(window.prompt_tokens));
            if let Some(reprompt) = window.reprompt_tokens {
                calls += attempts;
                tokens = tokens.saturating_add(per_call(reprompt));
            }
        }
        let estimate = BudgetEstimate {
            windows: windows.len(),
            calls,
            tokens,
            cost_usd: self.estimate_cost(tokens),
        };

        if let Some(max_total_tokens) = self.config.max_total_tokens
            && estimate.tokens > max_total_tokens
        {
            return Err(budget_exceeded(format!(
                "worst case of {} tokens over {} calls in {} windows exceeds max_total_tokens {}",
                estimate.tokens, estimate.calls, estimate.windows, max_total_tokens
            )));
        }
        if let Some(max_cost_usd) = self.config.max_cost_usd
            && estimate.cost_usd > max_cost_usd
        {
            return Err(budget_exceeded(format!(
                "estimated cost {:.4} USD exceeds max_cost_usd {:.4}",
                estimate.cost_usd, max_cost_usd
            )));
        }

        Ok(estimate)
    }

    /// Waits for a concurrency slot; the slot is held until the lease drops.
    pub async fn acquire(&self) -> Result<BudgetLease, SummarizeError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| internal_error("generation concurrency permits were closed"))?;
        Ok(BudgetLease {
            budget: self.call_budget(),
            _permit: permit,
        })
    }
}
