use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{
    error::{SummarizeError, invalid_input},
    hasher::window_hash,
    modes::ResolvedMode,
    types::{Message, MessageId, WindowHash},
};

const PER_MESSAGE_OVERHEAD_TOKENS: u64 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowPolicy {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_messages() -> usize {
    50
}

fn default_max_tokens() -> u64 {
    6_000
}

/// A contiguous, order-preserving slice of the conversation. Windows only
/// reference messages by position and id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Window {
    pub hash: WindowHash,
    pub index: usize,
    pub range: Range<usize>,
    pub message_ids: Vec<MessageId>,
    pub token_estimate: u64,
}

impl Window {
    pub fn messages<'a>(&self, conversation: &'a [Message]) -> &'a [Message] {
        &conversation[self.range.clone()]
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

pub fn estimate_message_tokens(message: &Message) -> u64 {
    estimate_tokens(&message.content) + PER_MESSAGE_OVERHEAD_TOKENS
}

/// Greedily packs messages into windows bounded by `policy`. A message that
/// alone exceeds the token bound still gets a window of its own.
pub fn split(
    messages: &[Message],
    mode: &ResolvedMode,
    policy: &WindowPolicy,
) -> Result<Vec<Window>, SummarizeError> {
    if policy.max_messages == 0 {
        return Err(invalid_input("windowing.max_messages must be at least 1"));
    }
    if policy.max_tokens == 0 {
        return Err(invalid_input("windowing.max_tokens must be at least 1"));
    }

    let mut ranges: Vec<(Range<usize>, u64)> = Vec::new();
    let mut start = 0_usize;
    let mut tokens = 0_u64;

    for (idx, message) in messages.iter().enumerate() {
        let cost = estimate_message_tokens(message);
        let count = idx - start;
        let overflow = count >= policy.max_messages || tokens + cost > policy.max_tokens;
        if count > 0 && overflow {
            ranges.push((start..idx, tokens));
            start = idx;
            tokens = 0;
        }
        tokens += cost;
    }
    if start < messages.len() {
        ranges.push((start..messages.len(), tokens));
    }

    ranges
        .into_iter()
        .enumerate()
        .map(|(index, (range, token_estimate))| {
            let message_ids: Vec<MessageId> = messages[range.clone()]
                .iter()
                .map(|message| message.id.clone())
                .collect();
            let hash = window_hash(mode.family.as_str(), mode.version, &message_ids)?;
            Ok(Window {
                hash,
                index,
                range,
                message_ids,
                token_estimate,
            })
        })
        .collect()
}
