use crate::ai::anthropic::AnthropicChatModel;
use crate::ai::message::ChatTurn;
use crate::ai::openai::OpenAiChatModel;
use crate::config::AppConfig;
use crate::error::{AppError, Result};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatProvider {
    OpenAi,
    Anthropic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatModelConfig {
    pub provider_id: ChatProvider,
    pub model_name: String,
    pub temperature: f32,
    pub max_retries: u32,
}

impl ChatModelConfig {
    /// `openai` selects GPT-4o; anything else, including no value, selects Claude.
    pub fn select(chat_model: Option<&str>) -> Self {
        match chat_model {
            Some("openai") => Self {
                provider_id: ChatProvider::OpenAi,
                model_name: "gpt-4o".to_string(),
                temperature: 0.2,
                max_retries: 6,
            },
            _ => Self {
                provider_id: ChatProvider::Anthropic,
                model_name: "claude-3-5-sonnet-20240620".to_string(),
                temperature: 0.0,
                max_retries: 2,
            },
        }
    }
}

/// Tool schema advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One increment of a streamed model response
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDelta {
    Content(String),
    /// Fragment of a tool call; fragments sharing `index` belong to one call
    ToolCallChunk {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
}

pub type DeltaStream = BoxStream<'static, Result<ModelDelta>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Full response as a single assistant turn
    async fn invoke(&self, messages: &[ChatTurn], tools: &[ToolDefinition]) -> Result<ChatTurn>;

    async fn stream(&self, messages: &[ChatTurn], tools: &[ToolDefinition]) -> Result<DeltaStream>;
}

pub fn create_chat_model(
    http: Client,
    config: &AppConfig,
    selection: &ChatModelConfig,
) -> Result<Arc<dyn ChatModel>> {
    let credential = match selection.provider_id {
        ChatProvider::OpenAi => "OPENAI_API_KEY",
        ChatProvider::Anthropic => "ANTHROPIC_API_KEY",
    };
    let api_key = config
        .credential(credential)
        .ok_or_else(|| {
            AppError::ConfigurationError(format!(
                "Missing {} for chat model {}",
                credential, selection.model_name
            ))
        })?
        .to_string();

    let model: Arc<dyn ChatModel> = match selection.provider_id {
        ChatProvider::OpenAi => Arc::new(OpenAiChatModel::new(
            http,
            config.openai_base_url.clone(),
            api_key,
            selection.clone(),
        )),
        ChatProvider::Anthropic => Arc::new(AnthropicChatModel::new(
            http,
            config.anthropic_base_url.clone(),
            api_key,
            selection.clone(),
        )),
    };
    Ok(model)
}

/// Send a request, retrying connect failures, 429 and 5xx with exponential
/// backoff. Only the response head is awaited, so a body is never re-read.
pub(crate) async fn send_with_retries<F>(
    build: F,
    max_retries: u32,
    provider: &str,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        let outcome = build().send().await;
        let retryable = match &outcome {
            Ok(response) => is_retryable(response.status()),
            Err(error) => error.is_connect() || error.is_timeout(),
        };

        if retryable && attempt < max_retries {
            let delay = backoff(attempt);
            log::warn!(
                "{} request failed (attempt {}), retrying in {:?}",
                provider,
                attempt + 1,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        let response =
            outcome.map_err(|error| AppError::upstream(None, format!("{}: {}", provider, error)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(AppError::upstream(
                Some(status.as_u16()),
                format!("{} request failed ({}): {}", provider, status, body.trim()),
            ));
        }
        return Ok(response);
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(attempt: u32) -> Duration {
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RETRY_MAX_DELAY)
}
