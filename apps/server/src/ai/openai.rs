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

/// OpenAI Chat Completions client with function calling
pub struct OpenAiChatModel {
    http: Client,
    endpoint: String,
    api_key: String,
    config: ChatModelConfig,
}

impl OpenAiChatModel {
    pub fn new(http: Client, base_url: String, api_key: String, config: ChatModelConfig) -> Self {
        Self {
            http,
            endpoint: format!("{}/v1/chat/completions", base_url),
            api_key,
            config,
        }
    }

    async fn send(&self, body: &Value) -> Result<Response> {
        send_with_retries(
            || {
                self.http
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .json(body)
            },
            self.config.max_retries,
            "OpenAI",
        )
        .await
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    async fn invoke(&self, messages: &[ChatTurn], tools: &[ToolDefinition]) -> Result<ChatTurn> {
        let body = build_request(&self.config, messages, tools, false);
        let response = self.send(&body).await?;
        let payload: CompletionResponse = response
            .json()
            .await
            .map_err(|error| AppError::upstream(None, error.to_string()))?;
        payload.into_turn()
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
            log::trace!("OpenAI SSE: {:?}", event.data);
            match parse_stream_chunk(&event.data)? {
                Some(deltas) => {
                    for delta in deltas {
                        yield delta;
                    }
                }
                None => break,
            }
        }
    }
}

fn build_request(
    config: &ChatModelConfig,
    messages: &[ChatTurn],
    tools: &[ToolDefinition],
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": config.model_name,
        "temperature": config.temperature,
        "messages": messages.iter().map(to_openai_message).collect::<Vec<_>>(),
        "stream": stream,
    });

    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }

    body
}

fn to_openai_message(turn: &ChatTurn) -> Value {
    match turn {
        ChatTurn::Ai {
            content,
            tool_calls,
        } if !tool_calls.is_empty() => {
            let calls: Vec<Value> = tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.args.to_string() }
                    })
                })
                .collect();
            let content = if content.is_empty() {
                Value::Null
            } else {
                Value::String(content.clone())
            };
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        ChatTurn::Tool {
            tool_call_id,
            content,
            ..
        } => json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content }),
        other => json!({ "role": other.role(), "content": other.content() }),
    }
}

/// `None` marks the `[DONE]` terminator
fn parse_stream_chunk(data: &str) -> Result<Option<Vec<ModelDelta>>> {
    if data.trim() == "[DONE]" {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(data)
        .map_err(|error| AppError::upstream(None, format!("SSE parsing error: {}", error)))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("An error occurred during streaming");
        return Err(AppError::upstream(None, message.to_string()));
    }

    let chunk: StreamChunk = serde_json::from_value(value)
        .map_err(|error| AppError::upstream(None, format!("SSE data schema error: {}", error)))?;

    let mut deltas = Vec::new();
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(content) = choice.delta.content.filter(|content| !content.is_empty()) {
            deltas.push(ModelDelta::Content(content));
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            deltas.push(ModelDelta::ToolCallChunk {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
    }
    Ok(Some(deltas))
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Debug, Deserialize)]
struct CompletionToolCall {
    id: String,
    function: CompletionFunction,
}

#[derive(Debug, Deserialize)]
struct CompletionFunction {
    name: String,
    arguments: String,
}

impl CompletionResponse {
    fn into_turn(self) -> Result<ChatTurn> {
        let message = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::upstream(None, "OpenAI returned no choices"))?
            .message;

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let args = parse_arguments(&call.function.arguments)?;
                Ok(ToolCall {
                    id: call.id,
                    name: call.function.name,
                    args,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ChatTurn::Ai {
            content: message.content.unwrap_or_default(),
            tool_calls,
        })
    }
}

fn parse_arguments(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw).map_err(|error| {
        AppError::upstream(None, format!("Invalid tool call arguments {}: {}", raw, error))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::chat_model::ChatModelConfig;

    #[test]
    fn content_chunk_becomes_content_delta() {
        let data = r#"{"object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#;
        let deltas = parse_stream_chunk(data).expect("parse").expect("not done");
        assert_eq!(deltas, vec![ModelDelta::Content("Hello".to_string())]);
    }

    #[test]
    fn tool_call_fragments_carry_index() {
        let data = r#"{"choices":[{"index":0,"delta":{"content":null,"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"vector_database_retrieval","arguments":"{\"qu"}}]}}]}"#;
        let deltas = parse_stream_chunk(data).expect("parse").expect("not done");
        assert_eq!(
            deltas,
            vec![ModelDelta::ToolCallChunk {
                index: 0,
                id: Some("call_1".to_string()),
                name: Some("vector_database_retrieval".to_string()),
                arguments: "{\"qu".to_string(),
            }]
        );
    }

    #[test]
    fn done_and_empty_choices() {
        assert!(parse_stream_chunk("[DONE]").expect("done").is_none());
        let usage_only = r#"{"choices":[],"usage":{"prompt_tokens":1}}"#;
        assert!(parse_stream_chunk(usage_only).expect("parse").expect("some").is_empty());
    }

    #[test]
    fn stream_error_payload_is_upstream_error() {
        let error = parse_stream_chunk(r#"{"error":{"message":"overloaded"}}"#)
            .expect_err("error frame");
        assert_eq!(error.to_string(), "overloaded");
    }

    #[test]
    fn assistant_tool_calls_are_serialized_as_functions() {
        let turn = ChatTurn::Ai {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "vector_database_retrieval".to_string(),
                args: json!({ "query": "ratings" }),
            }],
        };
        let message = to_openai_message(&turn);
        assert_eq!(message["content"], Value::Null);
        assert_eq!(message["tool_calls"][0]["function"]["arguments"], r#"{"query":"ratings"}"#);
    }

    #[test]
    fn request_includes_tools_only_when_present() {
        let config = ChatModelConfig::select(Some("openai"));
        let messages = [ChatTurn::system("be brief"), ChatTurn::human("hi")];
        let without = build_request(&config, &messages, &[], true);
        assert!(without.get("tools").is_none());
        assert_eq!(without["messages"][0]["role"], "system");

        let tool = ToolDefinition {
            name: "vector_database_retrieval".to_string(),
            description: "search".to_string(),
            parameters: json!({ "type": "object" }),
        };
        let with = build_request(&config, &messages, &[tool], false);
        assert_eq!(with["tools"][0]["function"]["name"], "vector_database_retrieval");
    }

    #[test]
    fn completion_response_parses_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": { "name": "vector_database_retrieval", "arguments": "{\"query\":\"cast\"}" }
                    }]
                }
            }]
        });
        let response: CompletionResponse = serde_json::from_value(raw).expect("parse");
        let turn = response.into_turn().expect("turn");
        assert_eq!(turn.tool_calls()[0].args, json!({ "query": "cast" }));
        assert_eq!(turn.content(), "");
    }
}
