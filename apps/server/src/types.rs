use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// A chat message as exchanged with the browser client
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl WireMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_calls: None,
        }
    }
}

/// A tool invocation requested by the chat model
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// Body of `POST /chat/retrieval-agent`
#[typeshare]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentChatRequest {
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    /// Missing or null means stream the answer
    #[serde(default)]
    pub show_intermediate_steps: Option<bool>,
}

impl AgentChatRequest {
    pub fn wants_intermediate_steps(&self) -> bool {
        self.show_intermediate_steps.unwrap_or(false)
    }
}

/// Query string of `POST /chat/retrieval-agent`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentChatQuery {
    pub embedding_model: Option<String>,
    pub chat_model: Option<String>,
}

/// Batch-mode response listing every turn of the agent run
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentChatResponse {
    pub messages: Vec<WireMessage>,
}

/// Body of `POST /retrieval/ingest`
#[typeshare]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub text: String,
}

/// Query string of `POST /retrieval/ingest`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestQuery {
    pub embedding_model: Option<String>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub ok: bool,
}

/// A document returned by similarity search, held only for one tool call
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedDocument {
    pub id: String,
    pub page_content: String,
    pub metadata: serde_json::Value,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_or_missing_intermediate_steps_means_stream() {
        for body in [
            r#"{"messages":[]}"#,
            r#"{"messages":[],"show_intermediate_steps":null}"#,
            r#"{"messages":[],"show_intermediate_steps":false}"#,
        ] {
            let request: AgentChatRequest = serde_json::from_str(body).expect("parse");
            assert!(!request.wants_intermediate_steps(), "{}", body);
        }

        let request: AgentChatRequest =
            serde_json::from_str(r#"{"messages":[],"show_intermediate_steps":true}"#).expect("parse");
        assert!(request.wants_intermediate_steps());
    }
}
