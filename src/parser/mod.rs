use std::collections::{BTreeMap, BTreeSet, HashMap};

use time::OffsetDateTime;

use crate::{
    error::{SummarizeError, malformed_output},
    modes::{OutputSchema, ResolvedMode},
    types::{AttributedItem, METADATA_FALLBACK_USED, Message, SummaryResult, WindowHash},
};

pub mod recovery;
pub mod strict;

/// What the parser knows about the window that produced the text.
pub struct WindowContext<'a> {
    pub mode: ResolvedMode,
    pub window_hash: &'a WindowHash,
    timestamps: HashMap<&'a str, OffsetDateTime>,
}

impl<'a> WindowContext<'a> {
    pub fn new(mode: ResolvedMode, window_hash: &'a WindowHash, messages: &'a [Message]) -> Self {
        Self {
            mode,
            window_hash,
            timestamps: messages
                .iter()
                .map(|message| (message.id.as_str(), message.timestamp))
                .collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.timestamps.contains_key(id)
    }

    pub fn anchor(&self, ids: &BTreeSet<String>) -> Option<OffsetDateTime> {
        ids.iter()
            .filter_map(|id| self.timestamps.get(id.as_str()).copied())
            .min()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub items: Vec<AttributedItem>,
}

/// Strict parse first, recovery parse only if strict fails. On double failure
/// the error carries the raw text and the strict reason.
pub fn parse(
    raw: &str,
    schema: OutputSchema,
    ctx: &WindowContext<'_>,
) -> Result<SummaryResult, SummarizeError> {
    let strict_reason = match strict::parse_strict(raw, schema, ctx) {
        Ok(document) => return Ok(finish(document, ctx, false)),
        Err(reason) => reason,
    };

    match recovery::recover(raw, schema, ctx) {
        Some(document) => {
            tracing::debug!(
                target: "parser",
                window_hash = %ctx.window_hash.short(),
                mode = %ctx.mode.label(),
                strict_reason = %strict_reason,
                recovered_items = document.items.len(),
                "recovery_parse_used"
            );
            Ok(finish(document, ctx, true))
        }
        None => Err(malformed_output(raw, strict_reason)),
    }
}

fn finish(
    document: ParsedDocument,
    ctx: &WindowContext<'_>,
    fallback_used: bool,
) -> SummaryResult {
    let mut metadata = BTreeMap::new();
    metadata.insert(
        METADATA_FALLBACK_USED.to_string(),
        serde_json::Value::Bool(fallback_used),
    );
    if let Some(title) = document.title {
        metadata.insert("title".to_string(), serde_json::Value::String(title));
    }
    if let Some(summary) = document.summary {
        metadata.insert("summary".to_string(), serde_json::Value::String(summary));
    }

    SummaryResult {
        mode: ctx.mode.family.as_str().to_string(),
        mode_version: ctx.mode.version,
        window_hash: ctx.window_hash.clone(),
        items: document.items,
        metadata,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
