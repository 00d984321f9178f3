use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::Validate;

pub type MessageId = String;
pub type Namespace = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single conversational message. Never mutated once ingested; every
/// attribution downstream points back at `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Message {
    #[validate(length(min = 1, max = 256))]
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        role: Role,
        content: impl Into<String>,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            timestamp,
        }
    }
}

/// Content-addressed identity of one unit of work (see `hasher`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHash(String);

impl WindowHash {
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for WindowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Point,
    Decision,
    Event,
    Task,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedItem {
    pub kind: ItemKind,
    pub text: String,
    pub source_msg_ids: BTreeSet<MessageId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Earliest timestamp among the source messages.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub anchored_at: Option<OffsetDateTime>,
}

impl AttributedItem {
    pub fn new(
        kind: ItemKind,
        text: impl Into<String>,
        source_msg_ids: impl IntoIterator<Item = MessageId>,
    ) -> Self {
        Self {
            kind,
            text: text.into(),
            source_msg_ids: source_msg_ids.into_iter().collect(),
            attributes: BTreeMap::new(),
            anchored_at: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_anchor(mut self, anchored_at: OffsetDateTime) -> Self {
        self.anchored_at = Some(anchored_at);
        self
    }
}

pub const METADATA_FALLBACK_USED: &str = "fallback_used";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub mode: String,
    pub mode_version: u32,
    pub window_hash: WindowHash,
    pub items: Vec<AttributedItem>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SummaryResult {
    pub fn fallback_used(&self) -> bool {
        self.metadata
            .get(METADATA_FALLBACK_USED)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}
