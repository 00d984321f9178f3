use std::collections::BTreeSet;

use crate::{
    modes::OutputSchema,
    parser::{ParsedDocument, WindowContext, non_blank},
    types::AttributedItem,
};

/// Accepts only a complete wire document. Returns the failure reason as text
/// so it can be reported if recovery fails too.
pub fn parse_strict(
    raw: &str,
    schema: OutputSchema,
    ctx: &WindowContext<'_>,
) -> Result<ParsedDocument, String> {
    let body = strip_code_fence(raw.trim());
    if body.is_empty() {
        return Err("output is empty".to_string());
    }

    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|err| format!("invalid JSON: {err}"))?;
    let document = schema
        .decode(value)
        .map_err(|err| format!("does not match {} schema: {err}", schema.collection_key()))?;

    let mut items = Vec::with_capacity(document.entries.len());
    for (idx, entry) in document.entries.into_iter().enumerate() {
        let text = entry.text.trim();
        if text.is_empty() {
            return Err(format!("item {idx} has an empty {}", schema.text_field()));
        }
        if entry.source_msg_ids.is_empty() {
            return Err(format!("item {idx} has no source_msg_ids"));
        }
        let ids: BTreeSet<String> = entry
            .source_msg_ids
            .iter()
            .map(|id| id.trim().to_string())
            .collect();
        if let Some(unknown) = ids.iter().find(|id| !ctx.contains(id)) {
            return Err(format!(
                "item {idx} cites message id '{unknown}' outside the window"
            ));
        }

        let mut item = AttributedItem::new(schema.item_kind(), text, ids);
        item.attributes = entry.attributes;
        item.anchored_at = ctx.anchor(&item.source_msg_ids);
        items.push(item);
    }

    Ok(ParsedDocument {
        title: non_blank(document.title),
        summary: non_blank(document.summary),
        items,
    })
}

/// Unwraps a single surrounding Markdown code fence, if present.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return text;
    };
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => rest.trim(),
    }
}
