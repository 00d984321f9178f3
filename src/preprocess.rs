use std::{collections::HashMap, sync::Arc, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{SummarizeError, internal_error},
    types::Message,
};

/// Rewrites message content before windowing. Implementations may drop
/// messages but must keep the ids and relative order of the survivors.
pub trait Preprocessor: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, messages: Vec<Message>) -> Vec<Message>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_true")]
    pub redact_pii: bool,
    #[serde(default = "default_true")]
    pub normalize_whitespace: bool,
    #[serde(default = "default_true")]
    pub drop_empty: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            redact_pii: true,
            normalize_whitespace: true,
            drop_empty: true,
        }
    }
}

fn default_true() -> bool {
    true
}

pub fn build_preprocessors(config: &PreprocessConfig) -> Vec<Arc<dyn Preprocessor>> {
    let mut chain: Vec<Arc<dyn Preprocessor>> = Vec::new();
    if config.normalize_whitespace {
        chain.push(Arc::new(WhitespaceNormalizer {
            drop_empty: config.drop_empty,
        }));
    }
    if config.redact_pii {
        chain.push(Arc::new(PiiRedactor));
    }
    chain
}

/// Runs the chain and checks each step kept its contract.
pub fn apply(
    chain: &[Arc<dyn Preprocessor>],
    mut messages: Vec<Message>,
) -> Result<Vec<Message>, SummarizeError> {
    for preprocessor in chain {
        let positions: HashMap<String, usize> = messages
            .iter()
            .enumerate()
            .map(|(idx, message)| (message.id.clone(), idx))
            .collect();
        let before = messages.len();
        let transformed = preprocessor.transform(messages);
        verify_survivors(preprocessor.name(), &positions, &transformed)?;
        if transformed.len() != before {
            tracing::debug!(
                target: "pipeline",
                preprocessor = %preprocessor.name(),
                before,
                after = transformed.len(),
                "preprocessor_dropped_messages"
            );
        }
        messages = transformed;
    }
    Ok(messages)
}

fn verify_survivors(
    name: &str,
    positions: &HashMap<String, usize>,
    survivors: &[Message],
) -> Result<(), SummarizeError> {
    let mut last: Option<usize> = None;
    for message in survivors {
        let Some(&position) = positions.get(&message.id) else {
            return Err(internal_error(format!(
                "preprocessor '{}' produced unknown message id '{}'",
                name, message.id
            )));
        };
        if last.is_some_and(|previous| position <= previous) {
            return Err(internal_error(format!(
                "preprocessor '{}' reordered or duplicated message '{}'",
                name, message.id
            )));
        }
        last = Some(position);
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct WhitespaceNormalizer {
    pub drop_empty: bool,
}

impl Preprocessor for WhitespaceNormalizer {
    fn name(&self) -> &str {
        "whitespace_normalizer"
    }

    fn transform(&self, messages: Vec<Message>) -> Vec<Message> {
        messages
            .into_iter()
            .map(|mut message| {
                message.content = message.content.split_whitespace().collect::<Vec<_>>().join(" ");
                message
            })
            .filter(|message| !(self.drop_empty && message.content.is_empty()))
            .collect()
    }
}

/// Masks e-mail addresses, card-like digit runs and phone numbers.
#[derive(Debug, Default)]
pub struct PiiRedactor;

impl Preprocessor for PiiRedactor {
    fn name(&self) -> &str {
        "pii_redactor"
    }

    fn transform(&self, messages: Vec<Message>) -> Vec<Message> {
        messages
            .into_iter()
            .map(|mut message| {
                message.content = redact(&message.content);
                message
            })
            .collect()
    }
}

fn redact(text: &str) -> String {
    let patterns = pii_patterns();
    let text = patterns.email.replace_all(text, "[email]");
    let text = patterns.card.replace_all(&text, "[card]");
    patterns.phone.replace_all(&text, "[phone]").into_owned()
}

struct PiiPatterns {
    email: Regex,
    card: Regex,
    phone: Regex,
}

fn pii_patterns() -> &'static PiiPatterns {
    static PATTERNS: OnceLock<PiiPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| PiiPatterns {
        email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .expect("email pattern is valid"),
        card: Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").expect("card pattern is valid"),
        phone: Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)[\s.-]?)?\b\d{3}[\s.-]\d{4}\b")
            .expect("phone pattern is valid"),
    })
}
