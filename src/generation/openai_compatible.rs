use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::generation::{
    Completion, GenerationBackend, GenerationBudget, UsageStats,
    error::{GenerationError, GenerationErrorKind, fatal},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialRef {
    Env { var: String },
    InlineToken { token: String },
    None,
}

impl Default for CredentialRef {
    fn default() -> Self {
        CredentialRef::Env {
            var: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_backend_id")]
    pub backend_id: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub credential: CredentialRef,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default = "default_json_mode")]
    pub json_mode: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend_id: default_backend_id(),
            endpoint: default_endpoint(),
            model: default_model(),
            credential: CredentialRef::default(),
            temperature: None,
            json_mode: default_json_mode(),
        }
    }
}

fn default_backend_id() -> String {
    "default".to_string()
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_json_mode() -> bool {
    true
}

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiCompatibleBackend {
    client: Client,
    config: GenerationConfig,
    auth_header: Option<String>,
}

impl OpenAiCompatibleBackend {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        if config.endpoint.trim().is_empty() {
            return Err(fatal("generation.endpoint cannot be empty"));
        }
        let auth_header = resolve_credential(&config)?;
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| fatal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            config,
            auth_header,
        })
    }
}

#[async_trait]
impl GenerationBackend for OpenAiCompatibleBackend {
    fn backend_id(&self) -> &str {
        &self.config.backend_id
    }

    async fn complete(
        &self,
        prompt: &str,
        budget: &GenerationBudget,
    ) -> Result<Completion, GenerationError> {
        let backend_id = self.config.backend_id.as_str();
        let url = format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );

        let mut body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": budget.max_tokens,
            "stream": false,
        });
        if let Some(temperature) = self.config.temperature {
            body["temperature"] = json!(temperature);
        }
        if self.config.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let mut request = self
            .client
            .post(url)
            .timeout(budget.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body);
        if let Some(auth_header) = &self.auth_header {
            request = request.header(header::AUTHORIZATION, auth_header);
        }

        let response = request.send().await.map_err(|err| {
            let kind = if err.is_timeout() {
                GenerationErrorKind::Timeout
            } else {
                GenerationErrorKind::Provider
            };
            GenerationError::new(kind, format!("openai-compatible request failed: {err}"))
                .with_backend_id(backend_id)
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(
                target: "generation",
                backend_id = %backend_id,
                http_status = status,
                "generation_http_error"
            );
            return Err(map_http_error(status, backend_id, &body));
        }

        let payload = response.json::<Value>().await.map_err(|err| {
            GenerationError::new(
                GenerationErrorKind::Provider,
                format!("openai-compatible body decode failed: {err}"),
            )
            .with_backend_id(backend_id)
        })?;
        let completion = parse_payload(&payload, backend_id)?;
        tracing::debug!(
            target: "generation",
            backend_id = %backend_id,
            model = %self.config.model,
            output_chars = completion.text.len(),
            total_tokens = completion.usage.as_ref().and_then(|usage| usage.total_tokens),
            "generation_completed"
        );
        Ok(completion)
    }
}

fn resolve_credential(config: &GenerationConfig) -> Result<Option<String>, GenerationError> {
    match &config.credential {
        CredentialRef::Env { var } => {
            let token = env::var(var).map_err(|_| {
                fatal(format!(
                    "missing credential environment variable {} for backend {}",
                    var, config.backend_id
                ))
                .with_backend_id(config.backend_id.clone())
            })?;
            Ok(Some(format!("Bearer {token}")))
        }
        CredentialRef::InlineToken { token } => {
            if token.trim().is_empty() {
                return Err(fatal("inline credential token cannot be empty"));
            }
            Ok(Some(format!("Bearer {token}")))
        }
        CredentialRef::None => Ok(None),
    }
}

pub fn map_http_error(status: u16, backend_id: &str, body: &str) -> GenerationError {
    let normalized_body = body.chars().take(240).collect::<String>();
    let kind = match status {
        429 => GenerationErrorKind::RateLimited,
        408 | 504 => GenerationErrorKind::Timeout,
        500..=599 => GenerationErrorKind::Provider,
        _ => GenerationErrorKind::Fatal,
    };

    let mut message = format!("backend returned status {status}");
    if !normalized_body.is_empty() {
        message = format!("{message}: {normalized_body}");
    }
    GenerationError::new(kind, message)
        .with_backend_id(backend_id)
        .with_provider_http_status(status)
}

fn parse_payload(payload: &Value, backend_id: &str) -> Result<Completion, GenerationError> {
    let choice = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| {
            fatal("openai-compatible response missing choices").with_backend_id(backend_id)
        })?;

    let text = choice
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(Completion {
        text,
        usage: payload.get("usage").map(parse_usage),
    })
}

fn parse_usage(usage: &Value) -> UsageStats {
    UsageStats {
        input_tokens: usage
            .get("prompt_tokens")
            .and_then(Value::as_u64)
            .or_else(|| usage.get("input_tokens").and_then(Value::as_u64)),
        output_tokens: usage
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .or_else(|| usage.get("output_tokens").and_then(Value::as_u64)),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
    }
}
