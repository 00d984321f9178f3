use std::{
    collections::{BTreeMap, BTreeSet},
    sync::OnceLock,
};

use regex::Regex;
use serde_json::Value;

use crate::{
    modes::OutputSchema,
    parser::{ParsedDocument, WindowContext, non_blank},
    types::AttributedItem,
};

const SOURCE_LABELS: &[&str] = &[
    "source_msg_ids",
    "sources",
    "source",
    "ids",
    "refs",
    "references",
    "cites",
];

const BULLET_MARKERS: &[&str] = &["- [ ] ", "- [x] ", "- [X] ", "- ", "* ", "• ", "+ "];

/// Best-effort reconstruction from text that failed the strict parse.
/// Candidates whose source ids cannot be tied to the window are dropped;
/// `None` means nothing usable survived.
pub fn recover(raw: &str, schema: OutputSchema, ctx: &WindowContext<'_>) -> Option<ParsedDocument> {
    recover_embedded_json(raw, schema, ctx).or_else(|| recover_lines(raw, schema, ctx))
}

fn recover_embedded_json(
    raw: &str,
    schema: OutputSchema,
    ctx: &WindowContext<'_>,
) -> Option<ParsedDocument> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }

    let value: Value = serde_json::from_str(&raw[start..=end]).ok()?;
    let document = schema.decode(value).ok()?;
    let items: Vec<AttributedItem> = document
        .entries
        .into_iter()
        .filter_map(|entry| {
            let ids = known_ids(entry.source_msg_ids.iter().map(String::as_str), ctx);
            build_item(schema, &entry.text, ids, entry.attributes, ctx)
        })
        .collect();
    if items.is_empty() {
        return None;
    }

    Some(ParsedDocument {
        title: non_blank(document.title),
        summary: non_blank(document.summary),
        items,
    })
}

#[derive(Debug, Default)]
struct Candidate {
    text: String,
    ids: BTreeSet<String>,
    attributes: BTreeMap<String, String>,
    /// Bullets and labelled items absorb the indented lines that follow them.
    continuable: bool,
}

impl Candidate {
    fn from_text(text: &str, ctx: &WindowContext<'_>, continuable: bool) -> Self {
        let (text, ids) = extract_references(text, ctx);
        Self {
            text,
            ids,
            attributes: BTreeMap::new(),
            continuable,
        }
    }

    fn append(&mut self, text: &str, ctx: &WindowContext<'_>) {
        let (text, ids) = extract_references(text, ctx);
        if !text.is_empty() {
            if !self.text.is_empty() {
                self.text.push(' ');
            }
            self.text.push_str(&text);
        }
        self.ids.extend(ids);
    }
}

fn recover_lines(
    raw: &str,
    schema: OutputSchema,
    ctx: &WindowContext<'_>,
) -> Option<ParsedDocument> {
    let mut document = ParsedDocument::default();
    let mut current: Option<Candidate> = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(&mut current, &mut document.items, schema, ctx);
            continue;
        }

        if let Some(candidate) = json_line_candidate(trimmed, schema, ctx) {
            flush(&mut current, &mut document.items, schema, ctx);
            current = Some(candidate);
            continue;
        }

        if let Some(rest) = strip_bullet(trimmed) {
            flush(&mut current, &mut document.items, schema, ctx);
            let text = match split_label(rest) {
                Some((label, value)) if label == schema.text_field() || label == "text" => value,
                _ => rest,
            };
            current = Some(Candidate::from_text(text, ctx, true));
            continue;
        }

        if let Some((label, value)) = split_label(trimmed)
            && apply_label(&label, value, &mut current, &mut document, schema, ctx)
        {
            continue;
        }

        // Plain prose: an indented line continues the open item, any other
        // line is an item of its own.
        let indented = line.starts_with(char::is_whitespace);
        if let Some(candidate) = current.as_mut()
            && indented
            && candidate.continuable
        {
            candidate.append(trimmed, ctx);
        } else {
            flush(&mut current, &mut document.items, schema, ctx);
            current = Some(Candidate::from_text(trimmed, ctx, false));
        }
    }
    flush(&mut current, &mut document.items, schema, ctx);

    (!document.items.is_empty()).then_some(document)
}

/// Returns false for labels this schema does not know; the line is then
/// treated as prose.
fn apply_label(
    label: &str,
    value: &str,
    current: &mut Option<Candidate>,
    document: &mut ParsedDocument,
    schema: OutputSchema,
    ctx: &WindowContext<'_>,
) -> bool {
    if SOURCE_LABELS.contains(&label) {
        if let Some(candidate) = current.as_mut() {
            candidate.ids.extend(known_ids(tokenize(value), ctx));
        }
    } else if label == schema.text_field() {
        flush(current, &mut document.items, schema, ctx);
        *current = Some(Candidate::from_text(value, ctx, true));
    } else if schema.attribute_fields().contains(&label) {
        if let Some(candidate) = current.as_mut()
            && !value.is_empty()
        {
            candidate.attributes.insert(label.to_string(), value.to_string());
        }
    } else if label == "title" {
        if document.title.is_none() {
            document.title = non_blank(Some(value.to_string()));
        }
    } else if label == "summary" {
        if document.summary.is_none() {
            document.summary = non_blank(Some(value.to_string()));
        }
    } else {
        return false;
    }
    true
}

fn flush(
    current: &mut Option<Candidate>,
    items: &mut Vec<AttributedItem>,
    schema: OutputSchema,
    ctx: &WindowContext<'_>,
) {
    let Some(candidate) = current.take() else {
        return;
    };
    if let Some(item) = build_item(
        schema,
        &candidate.text,
        candidate.ids,
        candidate.attributes,
        ctx,
    ) {
        items.push(item);
    }
}

fn build_item(
    schema: OutputSchema,
    text: &str,
    ids: BTreeSet<String>,
    attributes: BTreeMap<String, String>,
    ctx: &WindowContext<'_>,
) -> Option<AttributedItem> {
    let text = text.trim();
    if text.is_empty() || ids.is_empty() {
        return None;
    }
    let mut item = AttributedItem::new(schema.item_kind(), text, ids);
    item.attributes = attributes;
    item.anchored_at = ctx.anchor(&item.source_msg_ids);
    Some(item)
}

/// One wire item serialized on a single line, e.g. from a truncated array.
fn json_line_candidate(
    line: &str,
    schema: OutputSchema,
    ctx: &WindowContext<'_>,
) -> Option<Candidate> {
    let line = line.trim_end_matches(',');
    if !(line.starts_with('{') && line.ends_with('}')) {
        return None;
    }
    let Value::Object(object) = serde_json::from_str::<Value>(line).ok()? else {
        return None;
    };

    let text = object.get(schema.text_field())?.as_str()?.to_string();
    let ids = object
        .get("source_msg_ids")
        .and_then(Value::as_array)
        .map(|values| known_ids(values.iter().filter_map(Value::as_str), ctx))
        .unwrap_or_default();
    let attributes = schema
        .attribute_fields()
        .iter()
        .filter_map(|field| {
            let value = object.get(*field)?.as_str()?.trim();
            (!value.is_empty()).then(|| ((*field).to_string(), value.to_string()))
        })
        .collect();

    Some(Candidate {
        text,
        ids,
        attributes,
        continuable: false,
    })
}

fn strip_bullet(line: &str) -> Option<&str> {
    for marker in BULLET_MARKERS {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 || digits > 3 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ")
        .or_else(|| rest.strip_prefix(") "))
        .map(str::trim)
}

fn split_label(line: &str) -> Option<(String, &str)> {
    let captures = label_pattern().captures(line)?;
    let label = captures.get(1)?.as_str().trim().to_ascii_lowercase().replace(' ', "_");
    let value = captures.get(2).map_or("", |m| m.as_str());
    Some((label, value.trim()))
}

/// Pulls id references out of bracket, paren and `#tag` groups. Groups that
/// name no window id stay in the text.
fn extract_references(text: &str, ctx: &WindowContext<'_>) -> (String, BTreeSet<String>) {
    let mut ids = BTreeSet::new();
    let mut cleaned = String::with_capacity(text.len());
    let mut last = 0;

    for captures in reference_pattern().captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let inner = captures
            .get(1)
            .or_else(|| captures.get(2))
            .or_else(|| captures.get(3))
            .map_or("", |m| m.as_str());
        let found = known_ids(tokenize(inner), ctx);
        if found.is_empty() {
            continue;
        }
        cleaned.push_str(&text[last..whole.start()]);
        last = whole.end();
        ids.extend(found);
    }
    cleaned.push_str(&text[last..]);

    (tidy(&cleaned), ids)
}

fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| {
        c.is_whitespace() || matches!(c, ',' | ';' | '[' | ']' | '(' | ')' | '"' | '\'' | '`')
    })
    .map(|token| token.trim_matches(|c: char| c == ':' || c == '.'))
    .filter(|token| !token.is_empty())
}

fn known_ids<'a>(
    tokens: impl Iterator<Item = &'a str>,
    ctx: &WindowContext<'_>,
) -> BTreeSet<String> {
    tokens
        .filter_map(|token| {
            if ctx.contains(token) {
                return Some(token.to_string());
            }
            let bare = token.trim_start_matches('#');
            ctx.contains(bare).then(|| bare.to_string())
        })
        .collect()
}

fn tidy(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .replace("**", "")
        .replace(" .", ".")
        .replace(" ,", ",")
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '\u{2013}' | '\u{2014}' | ':' | ';' | ','))
        .to_string()
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[([^\[\]]*)\]|\(([^()]*)\)|#([A-Za-z0-9][A-Za-z0-9_.:-]*)")
            .expect("reference pattern is valid")
    })
}

fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^"?([A-Za-z][A-Za-z _]{0,30})"?\s*:\s*(.*)$"#).expect("label pattern is valid")
    })
}
