use time::format_description::well_known::Rfc3339;

use crate::{
    modes::{ModeFamily, OutputSchema, PromptInput},
    types::Message,
};

pub fn build_prompt(input: &PromptInput<'_>) -> String {
    let version = input.mode.version;
    let mut sections = vec![task_instructions(input.mode.family).to_string()];

    sections.push(concat!(
        "Attribution rules:\n",
        "1) Every item must cite the ids of the messages that justify it in source_msg_ids.\n",
        "2) Only cite ids that appear in the transcript below.\n",
        "3) Do not invent content that the messages do not support."
    )
    .to_string());

    if version >= 2 {
        if let Some(max_items) = input.options.max_items {
            sections.push(format!("Return at most {max_items} items."));
        }
    }
    if version >= 3 {
        if let Some(focus) = input.options.focus.as_deref() {
            sections.push(format!("Focus on: {focus}"));
        }
        if let Some(language) = input.options.language.as_deref() {
            sections.push(format!("Write item text in {language}."));
        }
    }
    if version >= 4 {
        sections.push(
            "Also provide a short \"title\" and a one-paragraph \"summary\" of the window."
                .to_string(),
        );
    }

    sections.push(output_contract(input.schema, version));
    sections.push(format!("## transcript\n{}", render_transcript(input.messages)));
    sections.join("\n\n")
}

/// Longest failure reason quoted back to the generator.
pub const MAX_REPROMPT_REASON_CHARS: usize = 240;

/// Follow-up prompt sent once when the first answer could not be parsed.
pub fn build_reprompt(original_prompt: &str, failure_reason: &str) -> String {
    let reason: String = failure_reason.chars().take(MAX_REPROMPT_REASON_CHARS).collect();
    format!(
        "{original_prompt}\n\n## correction\nYour previous answer could not be parsed ({reason}). \
         Answer again with the JSON document only, no prose and no code fences."
    )
}

/// The largest re-prompt `build_reprompt` can produce for `original_prompt`.
pub fn longest_reprompt(original_prompt: &str) -> String {
    build_reprompt(original_prompt, &"x".repeat(MAX_REPROMPT_REASON_CHARS))
}

fn task_instructions(family: ModeFamily) -> &'static str {
    match family {
        ModeFamily::Pointwise => concat!(
            "You summarize conversations into concise key points.\n",
            "Each point is one self-contained statement."
        ),
        ModeFamily::KeyDecisions => concat!(
            "You extract the decisions made in a conversation.\n",
            "Record who owns each decision, when it was made, and why, when the messages say so."
        ),
        ModeFamily::Timeline => concat!(
            "You reconstruct the chronology of a conversation.\n",
            "Each event carries the ISO timestamp at which it happened."
        ),
        ModeFamily::ActionItems => concat!(
            "You extract the action items agreed in a conversation.\n",
            "Record owner, due date and priority (high/medium/low) when they are stated."
        ),
    }
}

fn output_contract(schema: OutputSchema, version: u32) -> String {
    if version >= 2 {
        let schema_text =
            serde_json::to_string_pretty(&schema.json_schema()).unwrap_or_else(|_| "{}".into());
        return format!(
            "Respond with a single JSON document matching this schema:\n{schema_text}"
        );
    }

    let mut example = serde_json::Map::new();
    let mut item = serde_json::Map::new();
    item.insert(schema.text_field().to_string(), "...".into());
    for field in schema.attribute_fields() {
        item.insert((*field).to_string(), "...".into());
    }
    item.insert("source_msg_ids".to_string(), serde_json::json!(["<message id>"]));
    example.insert(
        schema.collection_key().to_string(),
        serde_json::Value::Array(vec![serde_json::Value::Object(item)]),
    );
    format!(
        "Respond with JSON shaped like:\n{}",
        serde_json::Value::Object(example)
    )
}

fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| {
            let timestamp = message
                .timestamp
                .format(&Rfc3339)
                .unwrap_or_else(|_| "-".to_string());
            format!(
                "[{}] {} @ {}: {}",
                message.id,
                message.role.as_str(),
                timestamp,
                message.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
