use serde::Serialize;

use crate::{
    error::SummarizeErrorKind,
    generation::{GenerationErrorKind, UsageStats},
    types::WindowHash,
};

#[derive(Debug, Clone)]
pub enum SummarizeTelemetryEvent {
    InvocationStarted {
        invocation_id: String,
        namespace: String,
        mode: String,
        message_count: usize,
        window_count: usize,
    },
    WindowSkipped {
        window_hash: WindowHash,
    },
    AttemptStarted {
        window_hash: WindowHash,
        attempt: u32,
    },
    AttemptFailed {
        window_hash: WindowHash,
        attempt: u32,
        kind: GenerationErrorKind,
        retryable: bool,
    },
    Reprompted {
        window_hash: WindowHash,
    },
    WindowParsed {
        window_hash: WindowHash,
        attempts: u32,
        items: usize,
        fallback_used: bool,
    },
    WindowFailed {
        window_hash: WindowHash,
        kind: SummarizeErrorKind,
    },
    FoldConflict {
        window_hash: WindowHash,
        attempt: u32,
    },
    InvocationCompleted {
        invocation_id: String,
        counters: TelemetryCounters,
    },
}

pub trait TelemetrySink: Send + Sync {
    fn on_event(&self, event: SummarizeTelemetryEvent);
}

#[derive(Default)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn on_event(&self, _event: SummarizeTelemetryEvent) {}
}

/// Forwards every event to `tracing` under the `telemetry` target.
#[derive(Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn on_event(&self, event: SummarizeTelemetryEvent) {
        match event {
            SummarizeTelemetryEvent::InvocationStarted {
                invocation_id,
                namespace,
                mode,
                message_count,
                window_count,
            } => tracing::info!(
                target: "telemetry",
                invocation_id = %invocation_id,
                namespace = %namespace,
                mode = %mode,
                message_count,
                window_count,
                "invocation_started"
            ),
            SummarizeTelemetryEvent::WindowSkipped { window_hash } => tracing::debug!(
                target: "telemetry",
                window_hash = %window_hash.short(),
                "window_skipped"
            ),
            SummarizeTelemetryEvent::AttemptStarted {
                window_hash,
                attempt,
            } => tracing::debug!(
                target: "telemetry",
                window_hash = %window_hash.short(),
                attempt,
                "attempt_started"
            ),
            SummarizeTelemetryEvent::AttemptFailed {
                window_hash,
                attempt,
                kind,
                retryable,
            } => tracing::warn!(
                target: "telemetry",
                window_hash = %window_hash.short(),
                attempt,
                kind = ?kind,
                retryable,
                "attempt_failed"
            ),
            SummarizeTelemetryEvent::Reprompted { window_hash } => tracing::debug!(
                target: "telemetry",
                window_hash = %window_hash.short(),
                "reprompted"
            ),
            SummarizeTelemetryEvent::WindowParsed {
                window_hash,
                attempts,
                items,
                fallback_used,
            } => tracing::debug!(
                target: "telemetry",
                window_hash = %window_hash.short(),
                attempts,
                items,
                fallback_used,
                "window_parsed"
            ),
            SummarizeTelemetryEvent::WindowFailed { window_hash, kind } => tracing::warn!(
                target: "telemetry",
                window_hash = %window_hash.short(),
                kind = ?kind,
                "window_failed"
            ),
            SummarizeTelemetryEvent::FoldConflict {
                window_hash,
                attempt,
            } => tracing::debug!(
                target: "telemetry",
                window_hash = %window_hash.short(),
                attempt,
                "fold_conflict"
            ),
            SummarizeTelemetryEvent::InvocationCompleted {
                invocation_id,
                counters,
            } => tracing::info!(
                target: "telemetry",
                invocation_id = %invocation_id,
                windows_total = counters.windows_total,
                windows_parsed = counters.windows_parsed,
                windows_failed = counters.windows_failed,
                windows_skipped = counters.windows_skipped,
                generation_calls = counters.generation_calls,
                retries = counters.retries,
                estimated_cost_usd = counters.estimated_cost_usd,
                "invocation_completed"
            ),
        }
    }
}

/// Per-invocation totals, returned to the caller with the outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryCounters {
    pub windows_total: u64,
    pub windows_parsed: u64,
    pub windows_failed: u64,
    pub windows_skipped: u64,
    pub generation_calls: u64,
    pub retries: u64,
    pub fallback_parses: u64,
    pub reprompts: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub conflict_retries: u64,
    pub estimated_cost_usd: f64,
}

impl TelemetryCounters {
    pub fn record_usage(&mut self, usage: &UsageStats) {
        self.input_tokens += usage.input_tokens.unwrap_or(0);
        self.output_tokens += usage.output_tokens.unwrap_or(0);
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
