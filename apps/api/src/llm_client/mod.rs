/// LLM Client: the single point of entry for all generative-text provider calls.
///
/// ARCHITECTURAL RULE: No other module may call the provider API directly.
/// All LLM interactions MUST go through `CompletionProvider`.
///
/// The client makes exactly one attempt per call. Retry policy belongs to the
/// caller, which can tell transient failures apart via `LlmError::is_transient`.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmSettings;
use crate::errors::AppError;

pub mod prompts;

/// OpenAI-compatible chat-completions endpoint (Groq).
pub const DEFAULT_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama3-70b-8192";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider request timed out")]
    Timeout,

    #[error("rate limited by provider (status {status})")]
    RateLimited { status: u16 },

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,
}

impl LlmError {
    /// Timeouts, rate limits, transport failures and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::RateLimited { .. } | LlmError::Http(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Parse(_) | LlmError::EmptyContent => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Http(e)
        }
    }
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Parse(_) | LlmError::EmptyContent => {
                AppError::GenerationContractViolation(format!("unparseable provider output: {e}"))
            }
            LlmError::Timeout => AppError::GenerationProvider("timeout".to_string()),
            other => AppError::GenerationProvider(other.to_string()),
        }
    }
}

/// Bounded parameters for one completion.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Raw text returned by the provider plus accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: Usage,
}

/// The provider seam. `LlmClient` is the production implementation.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: String,
}

/// Chat-completions client with JSON-object output mode.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings, timeout: Duration) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            warn!("LLM provider rate limited the request");
            return Err(LlmError::RateLimited {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ProviderError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            warn!("LLM API returned {}: {}", status, message);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let raw = response.text().await?;
        let chat: ChatResponse = serde_json::from_str(&raw)?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(LlmError::EmptyContent)?;

        debug!(
            "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
            chat.usage.prompt_tokens, chat.usage.completion_tokens
        );

        Ok(Completion {
            text,
            model: chat.model.unwrap_or_else(|| self.model.clone()),
            usage: chat.usage,
        })
    }
}

/// Parses model output as JSON, tolerating code fences and surrounding prose.
pub fn parse_json_text<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let unfenced = strip_json_fences(text);
    match serde_json::from_str(unfenced) {
        Ok(value) => Ok(value),
        Err(first_error) => match extract_json_object(unfenced) {
            Some(object) => serde_json::from_str(object).map_err(LlmError::Parse),
            None => Err(LlmError::Parse(first_error)),
        },
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

/// The outermost `{ ... }` span, if any.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_parse_json_text_with_leading_prose() {
        let input = "Here is your course:\n{\"title\": \"X\"}\nEnjoy!";
        let value: Value = parse_json_text(input).unwrap();
        assert_eq!(value["title"], "X");
    }

    #[test]
    fn test_parse_json_text_rejects_plain_prose() {
        let result: Result<Value, _> = parse_json_text("I cannot help with that.");
        assert!(matches!(result, Err(LlmError::Parse(_))));
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::RateLimited { status: 429 }.is_transient());
        assert!(LlmError::Api {
            status: 503,
            message: "overloaded".to_string()
        }
        .is_transient());
        assert!(!LlmError::Api {
            status: 400,
            message: "bad request".to_string()
        }
        .is_transient());
        assert!(!LlmError::EmptyContent.is_transient());
    }

    #[test]
    fn test_parse_errors_map_to_contract_violation() {
        let err: AppError = LlmError::EmptyContent.into();
        assert!(matches!(err, AppError::GenerationContractViolation(_)));
        let err: AppError = LlmError::Timeout.into();
        match err {
            AppError::GenerationProvider(msg) => assert_eq!(msg, "timeout"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chat_request_shape() {
        let body = ChatRequest {
            model: DEFAULT_MODEL,
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.3,
            max_tokens: 4000,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["max_tokens"], 4000);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_chat_response_without_usage() {
        let raw = r#"{"choices":[{"message":{"content":"{}"}}]}"#;
        let chat: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(chat.usage, Usage::default());
        assert!(chat.model.is_none());
    }
}
