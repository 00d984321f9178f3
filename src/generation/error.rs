use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    RateLimited,
    Timeout,
    Provider,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
    pub retryable: bool,
    pub backend_id: Option<String>,
    pub provider_http_status: Option<u16>,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: !matches!(kind, GenerationErrorKind::Fatal),
            backend_id: None,
            provider_http_status: None,
        }
    }

    pub fn with_backend_id(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = Some(backend_id.into());
        self
    }

    pub fn with_provider_http_status(mut self, status: u16) -> Self {
        self.provider_http_status = Some(status);
        self
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.backend_id, self.provider_http_status) {
            (Some(backend_id), Some(status)) => {
                write!(f, "{} (backend={}, status={})", self.message, backend_id, status)
            }
            (Some(backend_id), None) => write!(f, "{} (backend={})", self.message, backend_id),
            (None, Some(status)) => write!(f, "{} (status={})", self.message, status),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for GenerationError {}

pub fn rate_limited(message: impl Into<String>) -> GenerationError {
    GenerationError::new(GenerationErrorKind::RateLimited, message)
}

pub fn timeout(message: impl Into<String>) -> GenerationError {
    GenerationError::new(GenerationErrorKind::Timeout, message)
}

pub fn provider_error(message: impl Into<String>) -> GenerationError {
    GenerationError::new(GenerationErrorKind::Provider, message)
}

pub fn fatal(message: impl Into<String>) -> GenerationError {
    GenerationError::new(GenerationErrorKind::Fatal, message)
}
