mod budget;
mod flow;
mod validation;

use std::sync::Arc;

use summarion::{
    generation::{ScriptedBackend, scripted::transcript_ids},
    pipeline::{Summarizer, SummarizerSettings},
    store::{InMemoryStore, MemoryStore},
    telemetry::NoopTelemetrySink,
    types::{Message, Role},
    windower::WindowPolicy,
};
use time::{Duration, OffsetDateTime};

pub(crate) fn conversation(prefix: &str, count: usize) -> Vec<Message> {
    let base = OffsetDateTime::UNIX_EPOCH + Duration::days(20_000);
    (0..count)
        .map(|idx| {
            Message::new(
                format!("{prefix}{idx}"),
                if idx % 2 == 0 { Role::User } else { Role::Assistant },
                format!("message number {idx}"),
                base + Duration::minutes(idx as i64),
            )
        })
        .collect()
}

/// Answers every prompt with one point citing the whole transcript.
pub(crate) fn echo_backend() -> ScriptedBackend {
    ScriptedBackend::new().with_responder(|prompt| Ok(points_reply(&transcript_ids(prompt))))
}

pub(crate) fn points_reply(ids: &[String]) -> String {
    serde_json::json!({
        "points": [{
            "text": format!("covers {} messages", ids.len()),
            "source_msg_ids": ids,
        }]
    })
    .to_string()
}

pub(crate) fn settings_with_window(max_messages: usize) -> SummarizerSettings {
    SummarizerSettings {
        windowing: WindowPolicy {
            max_messages,
            max_tokens: 1_000_000,
        },
        ..SummarizerSettings::default()
    }
}

pub(crate) fn summarizer(
    backend: &ScriptedBackend,
    store: Arc<dyn MemoryStore>,
    settings: SummarizerSettings,
) -> Summarizer {
    Summarizer::new(Arc::new(backend.clone()), store, settings)
        .with_telemetry(Arc::new(NoopTelemetrySink))
}

pub(crate) fn memory_store() -> Arc<dyn MemoryStore> {
    Arc::new(InMemoryStore::new())
}
