use std::sync::Arc;

use summarion::{
    error::SummarizeErrorKind,
    memory::Tier,
    pipeline::{SummarizeOptions, validate_namespace},
    preprocess::Preprocessor,
    types::{Message, Role},
};
use time::OffsetDateTime;

use crate::{conversation, echo_backend, memory_store, settings_with_window, summarizer};

#[tokio::test]
async fn given_bad_requests_when_summarizing_then_invalid_input_and_no_calls() {
    let backend = echo_backend();
    let summarizer = summarizer(&backend, memory_store(), settings_with_window(50));
    let options = SummarizeOptions::default();

    let cases = [
        ("../etc", "pointwise"),
        ("", "pointwise"),
        ("team", "haiku"),
        ("team", "pointwise@1"),
        ("team", "pointwise@9"),
        ("team", "timeline@x"),
    ];
    for (namespace, mode) in cases {
        let err = summarizer
            .summarize(conversation("m", 3), mode, namespace, &options)
            .await
            .expect_err("request must be rejected");
        assert_eq!(
            err.kind,
            SummarizeErrorKind::InvalidInput,
            "namespace={namespace} mode={mode}"
        );
    }
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn given_duplicate_message_ids_when_summarizing_then_invalid_input() {
    let backend = echo_backend();
    let summarizer = summarizer(&backend, memory_store(), settings_with_window(50));
    let mut messages = conversation("m", 2);
    messages.push(Message::new("m0", Role::User, "again", OffsetDateTime::UNIX_EPOCH));

    let err = summarizer
        .summarize(messages, "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect_err("duplicate ids must be rejected");

    assert_eq!(err.kind, SummarizeErrorKind::InvalidInput);
    assert!(err.message.contains("duplicate"));
}

#[tokio::test]
async fn given_canonical_only_tiers_when_summarizing_then_invalid_input() {
    let backend = echo_backend();
    let summarizer = summarizer(&backend, memory_store(), settings_with_window(50));
    let options = SummarizeOptions {
        tiers: Some(vec![Tier::Canonical]),
        ..SummarizeOptions::default()
    };

    let err = summarizer
        .summarize(conversation("m", 2), "pointwise", "team", &options)
        .await
        .expect_err("canonical cannot be folded into");

    assert_eq!(err.kind, SummarizeErrorKind::InvalidInput);
}

#[test]
fn namespace_rules() {
    assert!(validate_namespace("team-a.notes_2").is_ok());
    assert!(validate_namespace("..").is_err());
    assert!(validate_namespace("a/b").is_err());
    assert!(validate_namespace(&"x".repeat(129)).is_err());
}

struct Reverser;

impl Preprocessor for Reverser {
    fn name(&self) -> &str {
        "reverser"
    }

    fn transform(&self, mut messages: Vec<Message>) -> Vec<Message> {
        messages.reverse();
        messages
    }
}

#[tokio::test]
async fn given_reordering_preprocessor_when_summarizing_then_internal_error() {
    let backend = echo_backend();
    let summarizer = summarizer(&backend, memory_store(), settings_with_window(50))
        .with_preprocessors(vec![Arc::new(Reverser) as Arc<dyn Preprocessor>]);

    let err = summarizer
        .summarize(conversation("m", 3), "pointwise", "team", &SummarizeOptions::default())
        .await
        .expect_err("reordering breaks the preprocessor contract");

    assert_eq!(err.kind, SummarizeErrorKind::Internal);
    assert_eq!(backend.calls(), 0);
}
