use std::sync::Arc;

use summarion::{
    memory::Tier,
    pipeline::{SummarizeOptions, WindowStatus},
    store::FileStore,
};
use uuid::Uuid;

use crate::{conversation, echo_backend, memory_store, settings_with_window, summarizer};

#[tokio::test]
async fn given_empty_input_when_summarizing_then_no_generation_happens() {
    let backend = echo_backend();
    let summarizer = summarizer(&backend, memory_store(), settings_with_window(50));

    let outcome = summarizer
        .summarize(Vec::new(), "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect("empty input is valid");

    assert_eq!(backend.calls(), 0);
    assert!(outcome.windows.is_empty());
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.state.revision, 0);
}

#[tokio::test]
async fn given_250_messages_when_summarizing_then_five_windows_fold_in_order() {
    let backend = echo_backend();
    let summarizer = summarizer(&backend, memory_store(), settings_with_window(50));

    let outcome = summarizer
        .summarize(
            conversation("m", 250),
            "pointwise",
            "team",
            &SummarizeOptions::default(),
        )
        .await
        .expect("summarize");

    assert_eq!(backend.calls(), 5);
    assert_eq!(outcome.results.len(), 5);
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.mode, "pointwise@4");
    assert_eq!(outcome.state.revision, 5);
    assert_eq!(outcome.state.rolling.items.len(), 5);
    assert_eq!(outcome.state.session.items.len(), 5);
    assert!(outcome.state.canonical.items.is_empty());
    let indexes: Vec<usize> = outcome.windows.iter().map(|window| window.index).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
    assert!(
        outcome
            .windows
            .iter()
            .all(|window| window.status == WindowStatus::Folded)
    );
    assert_eq!(outcome.telemetry.windows_parsed, 5);
    assert_eq!(outcome.telemetry.generation_calls, 5);
    assert_eq!(outcome.telemetry.retries, 0);
}

#[tokio::test]
async fn given_already_folded_input_when_summarizing_again_then_no_calls_are_made() {
    let backend = echo_backend();
    let summarizer = summarizer(&backend, memory_store(), settings_with_window(10));
    let messages = conversation("m", 30);

    let first = summarizer
        .summarize(messages.clone(), "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect("first run");
    let second = summarizer
        .summarize(messages, "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect("second run");

    assert_eq!(backend.calls(), 3);
    assert_eq!(second.state, first.state);
    assert_eq!(second.telemetry.windows_skipped, 3);
    assert!(
        second
            .windows
            .iter()
            .all(|window| window.status == WindowStatus::Skipped)
    );
}

#[tokio::test]
async fn given_concurrent_invocations_on_one_namespace_when_both_finish_then_both_windows_are_kept() {
    let backend = echo_backend();
    let summarizer = summarizer(&backend, memory_store(), settings_with_window(50));
    let options = SummarizeOptions::default();

    let (left, right) = tokio::join!(
        summarizer.summarize(conversation("a", 5), "pointwise", "team", &options),
        summarizer.summarize(conversation("b", 5), "pointwise", "team", &options),
    );
    left.expect("left invocation");
    right.expect("right invocation");

    let state = summarizer
        .load_state("team", "pointwise")
        .await
        .expect("load state");
    assert_eq!(state.revision, 2);
    assert_eq!(state.rolling.folded.len(), 2);
    assert_eq!(state.session.items.len(), 2);
}

#[tokio::test]
async fn given_rolling_only_option_when_summarizing_then_session_is_untouched() {
    let backend = echo_backend();
    let summarizer = summarizer(&backend, memory_store(), settings_with_window(50));
    let options = SummarizeOptions {
        tiers: Some(vec![Tier::Rolling]),
        ..SummarizeOptions::default()
    };

    let outcome = summarizer
        .summarize(conversation("m", 4), "pointwise", "team", &options)
        .await
        .expect("summarize");

    assert_eq!(outcome.state.rolling.items.len(), 1);
    assert!(outcome.state.session.items.is_empty());
}

#[tokio::test]
async fn given_bulleted_reply_when_summarizing_then_fallback_is_counted() {
    let backend = summarion::generation::ScriptedBackend::new().with_responder(|prompt| {
        let ids = summarion::generation::scripted::transcript_ids(prompt);
        Ok(format!("- everything discussed [{}]", ids.join(", ")))
    });
    let summarizer = summarizer(&backend, memory_store(), settings_with_window(50));

    let outcome = summarizer
        .summarize(conversation("m", 3), "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect("summarize");

    assert_eq!(outcome.telemetry.fallback_parses, 1);
    assert!(outcome.results[0].fallback_used());
    assert_eq!(outcome.results[0].items[0].source_msg_ids.len(), 3);
}

#[tokio::test]
async fn given_file_store_when_summarizing_then_state_is_visible_to_a_new_summarizer() {
    let root = std::env::temp_dir().join(format!("summarion-pipeline-test-{}", Uuid::now_v7()));
    let backend = echo_backend();
    let messages = conversation("m", 12);
    {
        let summarizer = summarizer(
            &backend,
            Arc::new(FileStore::new(&root)),
            settings_with_window(5),
        );
        summarizer
            .summarize(messages.clone(), "pointwise", "team", &SummarizeOptions::default())
            .await
            .expect("summarize");
    }

    let reopened = summarizer(
        &backend,
        Arc::new(FileStore::new(&root)),
        settings_with_window(5),
    );
    let outcome = reopened
        .summarize(messages, "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect("rerun");

    assert_eq!(backend.calls(), 3);
    assert_eq!(outcome.telemetry.windows_skipped, 3);
    assert_eq!(outcome.state.revision, 3);
    let audit = reopened
        .audit_log("team", "pointwise")
        .await
        .expect("audit log");
    assert_eq!(audit.len(), 3);
    let _ = std::fs::remove_dir_all(&root);
}
