use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod budget;
pub mod error;
pub mod openai_compatible;
pub mod reliability;
pub mod scripted;

pub use budget::{BudgetConfig, BudgetEnforcer, BudgetEstimate, WindowCallEstimate};
pub use error::{GenerationError, GenerationErrorKind};
pub use openai_compatible::{GenerationConfig, OpenAiCompatibleBackend};
pub use reliability::{ReliabilityConfig, ReliabilityLayer};
pub use scripted::ScriptedBackend;

/// Per-call limits handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationBudget {
    pub max_tokens: u64,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl UsageStats {
    pub fn add(&mut self, other: &UsageStats) {
        fn sum(left: Option<u64>, right: Option<u64>) -> Option<u64> {
            match (left, right) {
                (None, None) => None,
                (left, right) => Some(left.unwrap_or(0) + right.unwrap_or(0)),
            }
        }
        self.input_tokens = sum(self.input_tokens, other.input_tokens);
        self.output_tokens = sum(self.output_tokens, other.output_tokens);
        self.total_tokens = sum(self.total_tokens, other.total_tokens);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<UsageStats>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// A text generator. Implementations own transport and credentials; retries,
/// budgets and cancellation are layered on top by the executor.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn backend_id(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        budget: &GenerationBudget,
    ) -> Result<Completion, GenerationError>;
}
