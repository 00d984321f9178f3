use std::{collections::HashSet, pin::pin, sync::Arc};

use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{SummarizeError, invalid_input},
    executor::{ExecutionFailure, FailureStage, ModeExecutor, WindowExecution},
    generation::{
        BudgetConfig, BudgetEnforcer, GenerationBackend, ReliabilityConfig, ReliabilityLayer,
        WindowCallEstimate,
    },
    hasher::window_hash,
    memory::{AuditEntry, MemoryConfig, MemoryManager, MemoryState, Tier},
    modes::{ModeOptions, ResolvedMode, prompts::longest_reprompt},
    preprocess::{self, PreprocessConfig, Preprocessor},
    store::MemoryStore,
    telemetry::{SummarizeTelemetryEvent, TelemetryCounters, TelemetrySink, TracingTelemetrySink},
    types::{Message, MessageId, SummaryResult, WindowHash},
    windower::{self, Window, WindowPolicy, estimate_tokens},
};

const MAX_NAMESPACE_LEN: usize = 128;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizeOptions {
    #[serde(default)]
    pub mode_options: ModeOptions,
    /// Overrides `memory.fold_tiers` for this invocation.
    #[serde(default)]
    pub tiers: Option<Vec<Tier>>,
    /// Re-runs every window and rebuilds the canonical tier from the results.
    /// The messages passed in must be the full history of the namespace.
    #[serde(default)]
    pub refresh_canonical: bool,
    #[serde(default)]
    pub window_policy: Option<WindowPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    /// Already held by every targeted tier; not executed.
    Skipped,
    Folded,
    /// Parsed, but a concurrent writer folded it first.
    AlreadyFolded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowSummary {
    pub window_hash: WindowHash,
    pub index: usize,
    pub message_ids: Vec<MessageId>,
    pub status: WindowStatus,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowFailure {
    pub window_hash: WindowHash,
    pub message_ids: Vec<MessageId>,
    pub stage: FailureStage,
    pub error: SummarizeError,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummarizeOutcome {
    pub invocation_id: Uuid,
    pub mode: String,
    pub state: MemoryState,
    /// Parsed results in window order.
    pub results: Vec<SummaryResult>,
    pub windows: Vec<WindowSummary>,
    pub failures: Vec<WindowFailure>,
    pub canonical_refreshed: bool,
    /// Errors raised after the windows were folded, by the canonical refresh
    /// or the final state reload. Folded windows stay folded.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub finalize_errors: Vec<SummarizeError>,
    pub telemetry: TelemetryCounters,
}

/// The configuration sections the orchestrator consumes.
#[derive(Debug, Clone, Default)]
pub struct SummarizerSettings {
    pub reliability: ReliabilityConfig,
    pub budget: BudgetConfig,
    pub windowing: WindowPolicy,
    pub memory: MemoryConfig,
    pub preprocess: PreprocessConfig,
}

pub struct Summarizer {
    backend: Arc<dyn GenerationBackend>,
    store: Arc<dyn MemoryStore>,
    settings: SummarizerSettings,
    telemetry: Arc<dyn TelemetrySink>,
    preprocessors: Vec<Arc<dyn Preprocessor>>,
    executor: ModeExecutor,
    memory: MemoryManager,
}

struct Invocation<'a> {
    namespace: &'a str,
    mode: ResolvedMode,
    tiers: &'a [Tier],
    counters: TelemetryCounters,
    results: Vec<(usize, SummaryResult)>,
    windows: Vec<WindowSummary>,
    failures: Vec<WindowFailure>,
    /// Newest state observed through a successful write.
    latest_state: MemoryState,
}

impl Summarizer {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        store: Arc<dyn MemoryStore>,
        settings: SummarizerSettings,
    ) -> Self {
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetrySink);
        let preprocessors = preprocess::build_preprocessors(&settings.preprocess);
        let (executor, memory) = assemble(&backend, &store, &settings, &telemetry);
        Self {
            backend,
            store,
            settings,
            telemetry,
            preprocessors,
            executor,
            memory,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        let (executor, memory) = assemble(&self.backend, &self.store, &self.settings, &telemetry);
        self.telemetry = telemetry;
        self.executor = executor;
        self.memory = memory;
        self
    }

    pub fn with_preprocessors(mut self, preprocessors: Vec<Arc<dyn Preprocessor>>) -> Self {
        self.preprocessors = preprocessors;
        self
    }

    pub async fn load_state(
        &self,
        namespace: &str,
        mode: &str,
    ) -> Result<MemoryState, SummarizeError> {
        validate_namespace(namespace)?;
        let mode = ResolvedMode::resolve(mode)?;
        self.memory.load(namespace, mode.family).await
    }

    pub async fn audit_log(
        &self,
        namespace: &str,
        mode: &str,
    ) -> Result<Vec<AuditEntry>, SummarizeError> {
        validate_namespace(namespace)?;
        let mode = ResolvedMode::resolve(mode)?;
        self.memory.audit_log(namespace, mode.family).await
    }

    /// Re-runs the mode over `history` and replaces the canonical tier.
    pub async fn refresh_canonical(
        &self,
        history: Vec<Message>,
        mode: &str,
        namespace: &str,
        options: &SummarizeOptions,
    ) -> Result<SummarizeOutcome, SummarizeError> {
        let options = SummarizeOptions {
            refresh_canonical: true,
            ..options.clone()
        };
        self.summarize(history, mode, namespace, &options).await
    }

    /// Summarizes `messages` under `mode` and folds every parsed window into
    /// the memory of `namespace`. Window failures are reported in the outcome;
    /// only invocation-level problems surface as `Err`.
    pub async fn summarize(
        &self,
        messages: Vec<Message>,
        mode: &str,
        namespace: &str,
        options: &SummarizeOptions,
    ) -> Result<SummarizeOutcome, SummarizeError> {
        let invocation_id = Uuid::now_v7();
        let span = tracing::info_span!(
            "summarize",
            invocation_id = %invocation_id,
            namespace = %namespace,
            mode = %mode
        );
        self.run_invocation(invocation_id, messages, mode, namespace, options)
            .instrument(span)
            .await
    }

    async fn run_invocation(
        &self,
        invocation_id: Uuid,
        messages: Vec<Message>,
        mode: &str,
        namespace: &str,
        options: &SummarizeOptions,
    ) -> Result<SummarizeOutcome, SummarizeError> {
        validate_namespace(namespace)?;
        validate_messages(&messages)?;
        let mode = ResolvedMode::resolve(mode)?;
        let tiers = match &options.tiers {
            Some(tiers) => {
                let targets: Vec<Tier> = tiers
                    .iter()
                    .copied()
                    .filter(|tier| *tier != Tier::Canonical)
                    .collect();
                if targets.is_empty() {
                    return Err(invalid_input(
                        "options.tiers must name the rolling or session tier",
                    ));
                }
                targets
            }
            None => self.memory.fold_tiers(),
        };

        let messages = preprocess::apply(&self.preprocessors, messages)?;
        let policy = options
            .window_policy
            .as_ref()
            .unwrap_or(&self.settings.windowing);
        let windows = windower::split(&messages, &mode, policy)?;

        self.telemetry.on_event(SummarizeTelemetryEvent::InvocationStarted {
            invocation_id: invocation_id.to_string(),
            namespace: namespace.to_string(),
            mode: mode.label(),
            message_count: messages.len(),
            window_count: windows.len(),
        });

        let state = self.memory.load(namespace, mode.family).await?;
        let mut invocation = Invocation {
            namespace,
            mode,
            tiers: &tiers,
            counters: TelemetryCounters {
                windows_total: windows.len() as u64,
                ..TelemetryCounters::default()
            },
            results: Vec::new(),
            windows: Vec::new(),
            failures: Vec::new(),
            latest_state: state.clone(),
        };

        let mut pending = Vec::with_capacity(windows.len());
        for window in &windows {
            if !options.refresh_canonical && state.is_folded(&window.hash, &tiers) {
                invocation.skip(window);
                self.telemetry.on_event(SummarizeTelemetryEvent::WindowSkipped {
                    window_hash: window.hash.clone(),
                });
            } else {
                pending.push(window);
            }
        }

        if !pending.is_empty() {
            let reliability = self.executor.reliability();
            let reprompt = reliability.config().reprompt_on_parse_failure;
            let calls: Vec<WindowCallEstimate> = pending
                .iter()
                .map(|window| {
                    let prompt =
                        mode.build_prompt(window.messages(&messages), &options.mode_options);
                    WindowCallEstimate {
                        prompt_tokens: estimate_tokens(&prompt),
                        reprompt_tokens: reprompt
                            .then(|| estimate_tokens(&longest_reprompt(&prompt))),
                    }
                })
                .collect();
            let estimate = self
                .executor
                .budget()
                .preflight(&calls, reliability.max_attempts())?;
            tracing::debug!(
                target: "pipeline",
                invocation_id = %invocation_id,
                windows = estimate.windows,
                worst_case_calls = estimate.calls,
                estimated_tokens = estimate.tokens,
                estimated_cost_usd = estimate.cost_usd,
                "budget_preflight_passed"
            );
        }

        self.run_windows(&mut invocation, &pending, &messages, options)
            .await;

        let mut finalize_errors = Vec::new();
        let canonical_refreshed = if options.refresh_canonical {
            match self.refresh_after_run(&mut invocation, &messages).await {
                Ok(refreshed) => refreshed,
                Err(err) => {
                    tracing::warn!(
                        target: "pipeline",
                        invocation_id = %invocation_id,
                        namespace = %namespace,
                        error = %err,
                        "canonical_refresh_failed"
                    );
                    finalize_errors.push(err);
                    false
                }
            }
        } else {
            false
        };

        invocation.counters.estimated_cost_usd = self
            .executor
            .budget()
            .estimate_cost(invocation.counters.total_tokens());
        let state = match self.memory.load(namespace, mode.family).await {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(
                    target: "pipeline",
                    invocation_id = %invocation_id,
                    namespace = %namespace,
                    error = %err,
                    "final_state_reload_failed"
                );
                finalize_errors.push(err);
                invocation.latest_state.clone()
            }
        };
        let Invocation {
            counters,
            mut results,
            mut windows,
            failures,
            ..
        } = invocation;
        results.sort_by_key(|(index, _)| *index);
        windows.sort_by_key(|window| window.index);

        self.telemetry.on_event(SummarizeTelemetryEvent::InvocationCompleted {
            invocation_id: invocation_id.to_string(),
            counters: counters.clone(),
        });
        tracing::info!(
            target: "pipeline",
            invocation_id = %invocation_id,
            namespace = %namespace,
            mode = %mode.label(),
            windows = windows.len(),
            failures = failures.len(),
            finalize_errors = finalize_errors.len(),
            revision = state.revision,
            "summarize_completed"
        );

        Ok(SummarizeOutcome {
            invocation_id,
            mode: mode.label(),
            state,
            results: results.into_iter().map(|(_, result)| result).collect(),
            windows,
            failures,
            canonical_refreshed,
            finalize_errors,
            telemetry: counters,
        })
    }

    /// Executes windows concurrently and folds each as it completes. Folds
    /// run in the loop body so the deadline never interrupts one.
    async fn run_windows(
        &self,
        invocation: &mut Invocation<'_>,
        pending: &[&Window],
        messages: &[Message],
        options: &SummarizeOptions,
    ) {
        if pending.is_empty() {
            return;
        }

        let cancel = CancellationToken::new();
        let mode = invocation.mode;
        let executor = &self.executor;
        let cancel_ref = &cancel;
        let mut executions = pin!(
            stream::iter(pending.iter().copied().map(|window| async move {
                let execution = executor
                    .execute(
                        mode,
                        window,
                        window.messages(messages),
                        &options.mode_options,
                        cancel_ref,
                    )
                    .await;
                (window, execution)
            }))
            .buffer_unordered(executor.budget().max_concurrent_windows())
        );

        let deadline = executor.budget().invocation_deadline();
        let mut deadline_sleep = pin!(async move {
            match deadline {
                Some(deadline) => tokio::time::sleep(deadline).await,
                None => std::future::pending::<()>().await,
            }
        });

        loop {
            tokio::select! {
                _ = &mut deadline_sleep, if !cancel.is_cancelled() => {
                    tracing::warn!(
                        target: "pipeline",
                        namespace = %invocation.namespace,
                        mode = %mode.label(),
                        "invocation_deadline_elapsed"
                    );
                    cancel.cancel();
                }
                next = executions.next() => {
                    let Some((window, execution)) = next else {
                        break;
                    };
                    self.absorb(invocation, window, execution).await;
                }
            }
        }
    }

    async fn absorb(
        &self,
        invocation: &mut Invocation<'_>,
        window: &Window,
        execution: WindowExecution,
    ) {
        let counters = &mut invocation.counters;
        counters.generation_calls += u64::from(execution.attempts);
        counters.retries += u64::from(
            execution
                .attempts
                .saturating_sub(1 + u32::from(execution.reprompted)),
        );
        counters.reprompts += u64::from(execution.reprompted);
        counters.record_usage(&execution.usage);

        let result = match execution.outcome {
            Ok(result) => result,
            Err(failure) => {
                self.fail(invocation, window, execution.attempts, failure)
                    .await;
                return;
            }
        };
        if result.fallback_used() {
            invocation.counters.fallback_parses += 1;
        }

        let family = invocation.mode.family;
        match self
            .memory
            .fold(invocation.namespace, family, &result, invocation.tiers)
            .await
        {
            Ok(report) => {
                invocation.counters.conflict_retries += u64::from(report.conflict_retries);
                invocation.observe(report.state.clone());
                invocation.counters.windows_parsed += 1;
                let status = if report.already_folded() {
                    WindowStatus::AlreadyFolded
                } else {
                    WindowStatus::Folded
                };
                invocation.windows.push(WindowSummary {
                    window_hash: window.hash.clone(),
                    index: window.index,
                    message_ids: window.message_ids.clone(),
                    status,
                    attempts: execution.attempts,
                });
                invocation.results.push((window.index, result));
            }
            Err(error) => {
                let failure = ExecutionFailure {
                    stage: FailureStage::Fold,
                    error,
                };
                self.fail(invocation, window, execution.attempts, failure)
                    .await;
            }
        }
    }

    async fn fail(
        &self,
        invocation: &mut Invocation<'_>,
        window: &Window,
        attempts: u32,
        failure: ExecutionFailure,
    ) {
        tracing::warn!(
            target: "pipeline",
            namespace = %invocation.namespace,
            window_hash = %window.hash.short(),
            stage = ?failure.stage,
            error = %failure.error,
            "window_failed"
        );
        self.telemetry.on_event(SummarizeTelemetryEvent::WindowFailed {
            window_hash: window.hash.clone(),
            kind: failure.error.kind,
        });
        self.memory
            .record_failure(
                invocation.namespace,
                invocation.mode.family,
                &window.hash,
                failure.stage,
                &failure.error,
            )
            .await;

        invocation.counters.windows_failed += 1;
        invocation.windows.push(WindowSummary {
            window_hash: window.hash.clone(),
            index: window.index,
            message_ids: window.message_ids.clone(),
            status: WindowStatus::Failed,
            attempts,
        });
        invocation.failures.push(WindowFailure {
            window_hash: window.hash.clone(),
            message_ids: window.message_ids.clone(),
            stage: failure.stage,
            error: failure.error,
        });
    }

    async fn refresh_after_run(
        &self,
        invocation: &mut Invocation<'_>,
        messages: &[Message],
    ) -> Result<bool, SummarizeError> {
        if !invocation.failures.is_empty() || invocation.results.is_empty() {
            tracing::warn!(
                target: "pipeline",
                namespace = %invocation.namespace,
                mode = %invocation.mode.label(),
                failures = invocation.failures.len(),
                "canonical_refresh_skipped"
            );
            return Ok(false);
        }

        invocation.results.sort_by_key(|(index, _)| *index);
        let results: Vec<SummaryResult> = invocation
            .results
            .iter()
            .map(|(_, result)| result.clone())
            .collect();
        let refresh_hash = window_hash(
            invocation.mode.family.as_str(),
            invocation.mode.version,
            messages.iter().map(|message| message.id.as_str()),
        )?;
        let report = self
            .memory
            .refresh_canonical(
                invocation.namespace,
                invocation.mode.family,
                &results,
                &refresh_hash,
            )
            .await?;
        invocation.counters.conflict_retries += u64::from(report.conflict_retries);
        invocation.observe(report.state);
        Ok(true)
    }
}

impl Invocation<'_> {
    fn observe(&mut self, state: MemoryState) {
        if state.revision > self.latest_state.revision {
            self.latest_state = state;
        }
    }

    fn skip(&mut self, window: &Window) {
        self.counters.windows_skipped += 1;
        self.windows.push(WindowSummary {
            window_hash: window.hash.clone(),
            index: window.index,
            message_ids: window.message_ids.clone(),
            status: WindowStatus::Skipped,
            attempts: 0,
        });
    }
}

fn assemble(
    backend: &Arc<dyn GenerationBackend>,
    store: &Arc<dyn MemoryStore>,
    settings: &SummarizerSettings,
    telemetry: &Arc<dyn TelemetrySink>,
) -> (ModeExecutor, MemoryManager) {
    let executor = ModeExecutor::new(
        backend.clone(),
        ReliabilityLayer::new(settings.reliability.clone()),
        BudgetEnforcer::new(settings.budget.clone()),
        telemetry.clone(),
    );
    let memory = MemoryManager::new(store.clone(), settings.memory.clone(), telemetry.clone());
    (executor, memory)
}

pub fn validate_namespace(namespace: &str) -> Result<(), SummarizeError> {
    if namespace.is_empty() || namespace.len() > MAX_NAMESPACE_LEN {
        return Err(invalid_input(format!(
            "namespace must be 1..={MAX_NAMESPACE_LEN} characters"
        )));
    }
    if namespace == "." || namespace == ".." {
        return Err(invalid_input(format!("namespace '{namespace}' is reserved")));
    }
    if let Some(bad) = namespace
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(invalid_input(format!(
            "namespace '{namespace}' contains unsupported character {bad:?}"
        )));
    }
    Ok(())
}

fn validate_messages(messages: &[Message]) -> Result<(), SummarizeError> {
    let mut seen = HashSet::with_capacity(messages.len());
    for (idx, message) in messages.iter().enumerate() {
        message
            .validate()
            .map_err(|err| invalid_input(format!("message {idx} is invalid: {err}")))?;
        if !seen.insert(message.id.as_str()) {
            return Err(invalid_input(format!(
                "duplicate message id '{}'",
                message.id
            )));
        }
    }
    Ok(())
}
