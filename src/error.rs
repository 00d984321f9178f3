use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    generation::error::{GenerationError, GenerationErrorKind},
    store::StoreError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarizeErrorKind {
    InvalidInput,
    Generation,
    MalformedOutput,
    Conflict,
    BudgetExceeded,
    Store,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizeError {
    pub kind: SummarizeErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_kind: Option<GenerationErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl SummarizeError {
    pub fn new(kind: SummarizeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            generation_kind: None,
            raw_output: None,
        }
    }

    pub fn with_raw_output(mut self, raw_output: impl Into<String>) -> Self {
        self.raw_output = Some(raw_output.into());
        self
    }
}

impl fmt::Display for SummarizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.generation_kind {
            Some(kind) => write!(f, "{} (generation={:?})", self.message, kind),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for SummarizeError {}

impl From<GenerationError> for SummarizeError {
    fn from(err: GenerationError) -> Self {
        Self {
            kind: SummarizeErrorKind::Generation,
            message: err.to_string(),
            generation_kind: Some(err.kind),
            raw_output: None,
        }
    }
}

impl From<StoreError> for SummarizeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => {
                SummarizeError::new(SummarizeErrorKind::Conflict, err.to_string())
            }
            _ => SummarizeError::new(SummarizeErrorKind::Store, err.to_string()),
        }
    }
}

pub fn invalid_input(message: impl Into<String>) -> SummarizeError {
    SummarizeError::new(SummarizeErrorKind::InvalidInput, message)
}

pub fn malformed_output(raw_output: &str, strict_reason: impl Into<String>) -> SummarizeError {
    SummarizeError::new(
        SummarizeErrorKind::MalformedOutput,
        format!("unparseable generator output: {}", strict_reason.into()),
    )
    .with_raw_output(raw_output)
}

pub fn conflict(message: impl Into<String>) -> SummarizeError {
    SummarizeError::new(SummarizeErrorKind::Conflict, message)
}

pub fn budget_exceeded(message: impl Into<String>) -> SummarizeError {
    SummarizeError::new(SummarizeErrorKind::BudgetExceeded, message)
}

pub fn internal_error(message: impl Into<String>) -> SummarizeError {
    SummarizeError::new(SummarizeErrorKind::Internal, message)
}
