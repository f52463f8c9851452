use crate::ai::chat_model::{
    send_with_retries, ChatModel, ChatModelConfig, DeltaStream, ModelDelta, ToolDefinition,
};
use crate::ai::message::ChatTurn;
use crate::error::{AppError, Result};
use crate::types::ToolCall;

use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API client with tool use
pub struct AnthropicChatModel {
    http: Client,
    endpoint: String,
    api_key: String,
    config: ChatModelConfig,
}

impl AnthropicChatModel {
    pub fn new(http: Client, base_url: String, api_key: String, config: ChatModelConfig) -> Self {
        Self {
            http,
            endpoint: format!("{}/v1/messages", base_url),
            api_key,
            config,
        }
    }

    async fn send(&self, body: &Value) -> Result<Response> {
        send_with_retries(
            || {
                self.http
                    .post(&self.endpoint)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(body)
            },
            self.config.max_retries,
            "Anthropic",
        )
        .await
    }
}

#[async_trait]
impl ChatModel for AnthropicChatModel {
    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    async fn invoke(&self, messages: &[ChatTurn], tools: &[ToolDefinition]) -> Result<ChatTurn> {
        let body = build_request(&self.config, messages, tools, false);
        let response = self.send(&body).await?;
        let payload: MessageResponse = response
            .json()
            .await
            .map_err(|error| AppError::upstream(None, error.to_string()))?;
        Ok(payload.into_turn())
    }

    async fn stream(&self, messages: &[ChatTurn], tools: &[ToolDefinition]) -> Result<DeltaStream> {
        let body = build_request(&self.config, messages, tools, true);
        let response = self.send(&body).await?;
        Ok(Box::pin(delta_stream(response)))
    }
}

fn delta_stream(response: Response) -> impl Stream<Item = Result<ModelDelta>> + Send + 'static {
    try_stream! {
        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event
                .map_err(|error| AppError::upstream(None, format!("SSE stream error: {}", error)))?;
            log::trace!("Anthropic SSE: [{}] {}", event.event, event.data);
            match parse_stream_event(&event.event, &event.data)? {
                StreamFrame::Delta(delta) => yield delta,
                StreamFrame::Stop => break,
                StreamFrame::Skip => {}
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum StreamFrame {
    Delta(ModelDelta),
    Stop,
    Skip,
}

fn parse_stream_event(event: &str, data: &str) -> Result<StreamFrame> {
    let parse = |data: &str| -> Result<Value> {
        serde_json::from_str(data).map_err(|error| {
            AppError::upstream(None, format!("SSE parsing error: {}, data: {}", error, data))
        })
    };

    match event {
        "content_block_start" => {
            let value = parse(data)?;
            let index = block_index(&value);
            let block = &value["content_block"];
            if block["type"] == "tool_use" {
                return Ok(StreamFrame::Delta(ModelDelta::ToolCallChunk {
                    index,
                    id: block["id"].as_str().map(str::to_string),
                    name: block["name"].as_str().map(str::to_string),
                    arguments: String::new(),
                }));
            }
            Ok(StreamFrame::Skip)
        }
        "content_block_delta" => {
            let value = parse(data)?;
            let index = block_index(&value);
            let delta = &value["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => {
                    let text = delta["text"].as_str().unwrap_or_default();
                    if text.is_empty() {
                        Ok(StreamFrame::Skip)
                    } else {
                        Ok(StreamFrame::Delta(ModelDelta::Content(text.to_string())))
                    }
                }
                Some("input_json_delta") => Ok(StreamFrame::Delta(ModelDelta::ToolCallChunk {
                    index,
                    id: None,
                    name: None,
                    arguments: delta["partial_json"].as_str().unwrap_or_default().to_string(),
                })),
                _ => Ok(StreamFrame::Skip),
            }
        }
        "message_stop" => Ok(StreamFrame::Stop),
        "error" => {
            let value = parse(data)?;
            let error_type = value["error"]["type"].as_str().unwrap_or("error");
            let message = value["error"]["message"].as_str().unwrap_or("unknown error");
            Err(AppError::upstream(None, format!("{}: {}", error_type, message)))
        }
        _ => Ok(StreamFrame::Skip),
    }
}

fn block_index(value: &Value) -> usize {
    value["index"].as_u64().unwrap_or_default() as usize
}

fn build_request(
    config: &ChatModelConfig,
    messages: &[ChatTurn],
    tools: &[ToolDefinition],
    stream: bool,
) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter_map(|turn| match turn {
            ChatTurn::System { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();

    let mut body = json!({
        "model": config.model_name,
        "max_tokens": MAX_TOKENS,
        "temperature": config.temperature,
        "messages": to_anthropic_messages(messages),
        "stream": stream,
    });
    if !system.is_empty() {
        body["system"] = Value::String(system.join("\n\n"));
    }
    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters,
                })
            })
            .collect();
    }
    body
}

/// Tool results go back as `user` turns; consecutive results share one turn.
fn to_anthropic_messages(messages: &[ChatTurn]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    for turn in messages {
        match turn {
            ChatTurn::System { .. } => {}
            ChatTurn::Ai {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if !content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": content }));
                }
                for call in tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.args,
                    }));
                }
                // Empty assistant turns are rejected by the API
                if blocks.is_empty() {
                    continue;
                }
                result.push(json!({ "role": "assistant", "content": blocks }));
            }
            ChatTurn::Tool {
                tool_call_id,
                content,
                ..
            } => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": content,
                });
                let grouped = result.last().is_some_and(is_tool_result_turn);
                let previous = result
                    .last_mut()
                    .filter(|_| grouped)
                    .and_then(|last| last.get_mut("content"))
                    .and_then(Value::as_array_mut);
                match previous {
                    Some(blocks) => blocks.push(block),
                    None => result.push(json!({ "role": "user", "content": [block] })),
                }
            }
            other => {
                result.push(json!({ "role": "user", "content": other.content() }));
            }
        }
    }

    result
}

fn is_tool_result_turn(message: &Value) -> bool {
    message["role"] == "user"
        && message["content"]
            .as_array()
            .is_some_and(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Unknown,
}

impl MessageResponse {
    fn into_turn(self) -> ChatTurn {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in self.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    args: input,
                }),
                ContentBlock::Unknown => {}
            }
        }
        ChatTurn::Ai {
            content,
            tool_calls,
        }
    }
}
