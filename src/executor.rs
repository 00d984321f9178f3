use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{SummarizeError, budget_exceeded},
    generation::{BudgetEnforcer, Completion, GenerationBackend, ReliabilityLayer, UsageStats},
    modes::{ModeOptions, ResolvedMode, prompts::build_reprompt},
    parser::{self, WindowContext},
    telemetry::{SummarizeTelemetryEvent, TelemetrySink},
    types::{Message, SummaryResult},
    windower::Window,
};

/// Lifecycle of one window inside the executor. A configured re-prompt moves
/// `AwaitingResult` back to `Prompted` once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    Pending,
    Prompted,
    AwaitingResult,
    Parsed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Budget,
    Generation,
    Parse,
    Fold,
}

#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    pub stage: FailureStage,
    pub error: SummarizeError,
}

#[derive(Debug, Clone)]
pub struct WindowExecution {
    pub outcome: Result<SummaryResult, ExecutionFailure>,
    pub attempts: u32,
    pub reprompted: bool,
    pub usage: UsageStats,
}

/// Runs a single window: prompt, generate with retries, parse.
#[derive(Clone)]
pub struct ModeExecutor {
    backend: Arc<dyn GenerationBackend>,
    reliability: ReliabilityLayer,
    budget: BudgetEnforcer,
    telemetry: Arc<dyn TelemetrySink>,
}

struct Progress<'a> {
    window: &'a Window,
    state: WindowState,
    attempts: u32,
    reprompted: bool,
    usage: UsageStats,
}

impl Progress<'_> {
    fn transition(&mut self, next: WindowState) {
        tracing::trace!(
            target: "executor",
            window_hash = %self.window.hash.short(),
            from = ?self.state,
            to = ?next,
            "window_state_changed"
        );
        self.state = next;
    }

    fn finish(mut self, outcome: Result<SummaryResult, ExecutionFailure>) -> WindowExecution {
        let terminal = if outcome.is_ok() {
            WindowState::Parsed
        } else {
            WindowState::Failed
        };
        self.transition(terminal);
        WindowExecution {
            outcome,
            attempts: self.attempts,
            reprompted: self.reprompted,
            usage: self.usage,
        }
    }
}

impl ModeExecutor {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        reliability: ReliabilityLayer,
        budget: BudgetEnforcer,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            backend,
            reliability,
            budget,
            telemetry,
        }
    }

    pub fn budget(&self) -> &BudgetEnforcer {
        &self.budget
    }

    pub fn reliability(&self) -> &ReliabilityLayer {
        &self.reliability
    }

    /// Never returns an error: every failure is captured in the execution so
    /// one window cannot abort its siblings.
    pub async fn execute(
        &self,
        mode: ResolvedMode,
        window: &Window,
        messages: &[Message],
        options: &ModeOptions,
        cancel: &CancellationToken,
    ) -> WindowExecution {
        let mut progress = Progress {
            window,
            state: WindowState::Pending,
            attempts: 0,
            reprompted: false,
            usage: UsageStats::default(),
        };

        let prompt = mode.build_prompt(messages, options);
        progress.transition(WindowState::Prompted);
        let ctx = WindowContext::new(mode, &window.hash, messages);

        let completion = match self.generate(&prompt, cancel, &mut progress).await {
            Ok(completion) => completion,
            Err(failure) => return progress.finish(Err(failure)),
        };

        let first_error = match parser::parse(&completion.text, mode.schema(), &ctx) {
            Ok(result) => return self.parsed(progress, result),
            Err(err) => err,
        };
        if !self.reliability.config().reprompt_on_parse_failure {
            return progress.finish(Err(ExecutionFailure {
                stage: FailureStage::Parse,
                error: first_error,
            }));
        }

        progress.reprompted = true;
        progress.transition(WindowState::Prompted);
        self.telemetry.on_event(SummarizeTelemetryEvent::Reprompted {
            window_hash: window.hash.clone(),
        });
        let reprompt = build_reprompt(&prompt, &first_error.message);
        let completion = match self.generate(&reprompt, cancel, &mut progress).await {
            Ok(completion) => completion,
            Err(failure) => return progress.finish(Err(failure)),
        };
        match parser::parse(&completion.text, mode.schema(), &ctx) {
            Ok(result) => self.parsed(progress, result),
            Err(error) => progress.finish(Err(ExecutionFailure {
                stage: FailureStage::Parse,
                error,
            })),
        }
    }

    fn parsed(&self, progress: Progress<'_>, mut result: SummaryResult) -> WindowExecution {
        result
            .metadata
            .insert("attempts".to_string(), progress.attempts.into());
        result
            .metadata
            .insert("reprompted".to_string(), progress.reprompted.into());
        self.telemetry.on_event(SummarizeTelemetryEvent::WindowParsed {
            window_hash: progress.window.hash.clone(),
            attempts: progress.attempts,
            items: result.items.len(),
            fallback_used: result.fallback_used(),
        });
        progress.finish(Ok(result))
    }

    async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
        progress: &mut Progress<'_>,
    ) -> Result<Completion, ExecutionFailure> {
        let window_hash = progress.window.hash.clone();
        let lease = tokio::select! {
            _ = cancel.cancelled() => return Err(deadline_failure()),
            lease = self.budget.acquire() => lease.map_err(|error| ExecutionFailure {
                stage: FailureStage::Budget,
                error,
            })?,
        };

        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(deadline_failure());
            }
            attempt += 1;
            progress.attempts += 1;
            progress.transition(WindowState::AwaitingResult);
            self.telemetry.on_event(SummarizeTelemetryEvent::AttemptStarted {
                window_hash: window_hash.clone(),
                attempt,
            });

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(deadline_failure()),
                result = self.backend.complete(prompt, &lease.budget) => result,
            };

            let err = match result {
                Ok(completion) => {
                    if let Some(usage) = &completion.usage {
                        progress.usage.add(usage);
                    }
                    return Ok(completion);
                }
                Err(err) => err,
            };

            self.telemetry.on_event(SummarizeTelemetryEvent::AttemptFailed {
                window_hash: window_hash.clone(),
                attempt,
                kind: err.kind,
                retryable: err.retryable,
            });
            if !self.reliability.can_retry(&err, attempt) {
                return Err(ExecutionFailure {
                    stage: FailureStage::Generation,
                    error: err.into(),
                });
            }

            let delay = self.reliability.backoff_delay(attempt);
            tracing::debug!(
                target: "executor",
                window_hash = %window_hash.short(),
                backend_id = %self.backend.backend_id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "generation_retry_scheduled"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(deadline_failure()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn deadline_failure() -> ExecutionFailure {
    ExecutionFailure {
        stage: FailureStage::Budget,
        error: budget_exceeded("invocation deadline elapsed before the window completed"),
    }
}
