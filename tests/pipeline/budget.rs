use std::time::Duration;

use summarion::{
    error::SummarizeErrorKind,
    executor::FailureStage,
    generation::{BudgetConfig, ReliabilityConfig, error::provider_error},
    modes::{ModeOptions, ResolvedMode, prompts::longest_reprompt},
    pipeline::{SummarizeOptions, SummarizerSettings},
    types::Message,
    windower::estimate_tokens,
};

use crate::{conversation, echo_backend, memory_store, settings_with_window, summarizer};

/// Settings with a three-attempt ceiling, re-prompting on, and a single
/// window holding the whole conversation.
fn reprompting_settings(max_total_tokens: u64) -> SummarizerSettings {
    SummarizerSettings {
        reliability: ReliabilityConfig {
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            reprompt_on_parse_failure: true,
        },
        budget: BudgetConfig {
            max_total_tokens: Some(max_total_tokens),
            ..BudgetConfig::default()
        },
        ..settings_with_window(50)
    }
}

/// Token estimate of one call for the first prompt and for the re-prompt.
fn call_estimates(messages: &[Message]) -> (u64, u64) {
    let output = BudgetConfig::default().max_output_tokens;
    let mode = ResolvedMode::resolve("pointwise").expect("mode");
    let prompt = mode.build_prompt(messages, &ModeOptions::default());
    (
        estimate_tokens(&prompt) + output,
        estimate_tokens(&longest_reprompt(&prompt)) + output,
    )
}

#[tokio::test]
async fn given_ceiling_of_one_call_when_retries_and_reprompt_are_possible_then_rejected_up_front() {
    let messages = conversation("m", 3);
    let (first_call, _) = call_estimates(&messages);
    let backend = echo_backend();
    backend.push_error(provider_error("upstream 502")).await;
    backend.push_error(provider_error("upstream 502")).await;
    backend.push_text("no structured answer this time").await;
    let summarizer = summarizer(&backend, memory_store(), reprompting_settings(first_call));

    let err = summarizer
        .summarize(messages, "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect_err("worst case is six calls");

    assert_eq!(err.kind, SummarizeErrorKind::BudgetExceeded);
    assert!(err.message.contains("6 calls"));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn given_ceiling_at_worst_case_when_retrying_and_reprompting_then_window_folds() {
    let messages = conversation("m", 3);
    let (first_call, reprompt_call) = call_estimates(&messages);
    let backend = echo_backend();
    backend.push_error(provider_error("upstream 502")).await;
    backend.push_error(provider_error("upstream 502")).await;
    backend.push_text("no structured answer this time").await;
    let settings = reprompting_settings(3 * first_call + 3 * reprompt_call);
    let summarizer = summarizer(&backend, memory_store(), settings);

    let outcome = summarizer
        .summarize(messages, "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect("worst case fits the ceiling");

    assert!(outcome.failures.is_empty());
    assert_eq!(backend.calls(), 4);
    assert_eq!(outcome.telemetry.reprompts, 1);
    assert_eq!(outcome.state.revision, 1);
}

#[tokio::test]
async fn given_token_ceiling_below_estimate_when_summarizing_then_rejected_before_any_call() {
    let backend = echo_backend();
    let settings = SummarizerSettings {
        budget: BudgetConfig {
            max_total_tokens: Some(100),
            ..BudgetConfig::default()
        },
        ..settings_with_window(50)
    };
    let summarizer = summarizer(&backend, memory_store(), settings);

    let err = summarizer
        .summarize(conversation("m", 10), "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect_err("budget must be rejected");

    assert_eq!(err.kind, SummarizeErrorKind::BudgetExceeded);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn given_cost_ceiling_when_estimate_exceeds_it_then_rejected() {
    let backend = echo_backend();
    let settings = SummarizerSettings {
        budget: BudgetConfig {
            cost_per_1k_tokens_usd: 10.0,
            max_cost_usd: Some(0.01),
            ..BudgetConfig::default()
        },
        ..settings_with_window(50)
    };
    let summarizer = summarizer(&backend, memory_store(), settings);

    let err = summarizer
        .summarize(conversation("m", 3), "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect_err("cost must be rejected");

    assert_eq!(err.kind, SummarizeErrorKind::BudgetExceeded);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn given_output_request_above_per_call_ceiling_then_rejected() {
    let backend = echo_backend();
    let settings = SummarizerSettings {
        budget: BudgetConfig {
            max_output_tokens: 4_096,
            max_output_tokens_per_call: Some(1_024),
            ..BudgetConfig::default()
        },
        ..settings_with_window(50)
    };
    let summarizer = summarizer(&backend, memory_store(), settings);

    let err = summarizer
        .summarize(conversation("m", 3), "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect_err("per-call ceiling must be rejected");

    assert_eq!(err.kind, SummarizeErrorKind::BudgetExceeded);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn given_slow_backend_when_deadline_elapses_then_windows_fail_with_budget_stage() {
    let backend = echo_backend().with_latency(Duration::from_secs(5));
    let settings = SummarizerSettings {
        budget: BudgetConfig {
            invocation_timeout_ms: Some(50),
            ..BudgetConfig::default()
        },
        ..settings_with_window(2)
    };
    let summarizer = summarizer(&backend, memory_store(), settings);

    let started = std::time::Instant::now();
    let outcome = summarizer
        .summarize(conversation("m", 4), "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect("deadline failures are per window");

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(outcome.failures.len(), 2);
    assert!(outcome.failures.iter().all(|failure| {
        failure.stage == FailureStage::Budget
            && failure.error.kind == SummarizeErrorKind::BudgetExceeded
    }));
    assert_eq!(outcome.state.revision, 0);
}

#[tokio::test]
async fn given_deadline_between_windows_when_it_elapses_then_folded_window_stays_folded() {
    let backend = echo_backend().with_latency_by(|prompt| {
        if prompt.contains("[m2] ") {
            Duration::from_secs(5)
        } else {
            Duration::ZERO
        }
    });
    let settings = SummarizerSettings {
        budget: BudgetConfig {
            invocation_timeout_ms: Some(200),
            ..BudgetConfig::default()
        },
        ..settings_with_window(2)
    };
    let summarizer = summarizer(&backend, memory_store(), settings);

    let outcome = summarizer
        .summarize(conversation("m", 4), "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect("deadline failures are per window");

    assert_eq!(outcome.state.revision, 1);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    let failure = &outcome.failures[0];
    assert_eq!(failure.stage, FailureStage::Budget);
    assert_eq!(failure.message_ids, vec!["m2".to_string(), "m3".to_string()]);

    let state = summarizer
        .load_state("team", "pointwise")
        .await
        .expect("state");
    assert!(state.rolling.contains(&outcome.results[0].window_hash));
}
