//! Completion service client.
//!
//! The decision agent talks to an OpenAI-compatible chat-completions
//! endpoint through the [`CompletionBackend`] trait so tests can script
//! the backend without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;

pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";
const BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    /// Connection-level failure; worth retrying with backoff.
    #[error("completion transport failure: {0}")]
    Transport(String),
    #[error("completion API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        retryable: bool,
    },
    #[error("completion response carried no content")]
    Empty,
}

impl CompletionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Transport(_) => true,
            CompletionError::Api { retryable, .. } => *retryable,
            CompletionError::Empty => false,
        }
    }
}

/// Seam between the agent and the external completion service.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        max_tokens: u32,
    ) -> Result<String, CompletionError>;

    /// Model identifier recorded in result documents.
    fn model(&self) -> &str;
}

/// Backend implementation over the OpenAI HTTP API.
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Build a backend from `OPENAI_API_KEY` / `COMPLETION_MODEL`.
    pub fn try_from_env() -> Result<Self, AppError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AppError::config("OPENAI_API_KEY is not set"))?;
        let model = std::env::var("COMPLETION_MODEL")
            .unwrap_or_else(|_| DEFAULT_COMPLETION_MODEL.to_string());
        Ok(Self::new(api_key, model))
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens,
            n: 1,
        };

        let response = self
            .client
            .post(BASE_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|err| CompletionError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(map_http_error(status, body));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::Transport(err.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(CompletionError::Empty)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn map_http_error(status: StatusCode, body: String) -> CompletionError {
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or(body);

    let retryable = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    );

    CompletionError::Api {
        status: status.as_u16(),
        message,
        retryable,
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    max_tokens: u32,
    n: u8,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}
