use crate::types::{ToolCall, WireMessage};

/// Internal chat turn. The variant fixes the role for the turn's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatTurn {
    Human {
        content: String,
    },
    Ai {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    System {
        content: String,
    },
    /// Result of one tool call, fed back to the model
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
    /// Any role the client sent that we do not interpret; the tag is kept verbatim
    Other {
        role: String,
        content: String,
    },
}

impl ChatTurn {
    pub fn human(content: impl Into<String>) -> Self {
        ChatTurn::Human {
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        ChatTurn::Ai {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        ChatTurn::System {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ChatTurn::Human { content }
            | ChatTurn::Ai { content, .. }
            | ChatTurn::System { content }
            | ChatTurn::Tool { content, .. }
            | ChatTurn::Other { content, .. } => content,
        }
    }

    pub fn role(&self) -> &str {
        match self {
            ChatTurn::Human { .. } => "user",
            ChatTurn::Ai { .. } => "assistant",
            ChatTurn::System { .. } => "system",
            ChatTurn::Tool { .. } => "tool",
            ChatTurn::Other { role, .. } => role,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            ChatTurn::Ai { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Inbound conversion. Never fails; tool calls sent by the client are dropped.
pub fn to_internal(message: &WireMessage) -> ChatTurn {
    match message.role.as_str() {
        "user" => ChatTurn::human(message.content.clone()),
        "assistant" => ChatTurn::ai(message.content.clone()),
        role => ChatTurn::Other {
            role: role.to_string(),
            content: message.content.clone(),
        },
    }
}

pub fn to_wire(turn: &ChatTurn) -> WireMessage {
    match turn {
        ChatTurn::Ai {
            content,
            tool_calls,
        } => WireMessage {
            role: "assistant".to_string(),
            content: content.clone(),
            tool_calls: Some(tool_calls.clone()),
        },
        other => WireMessage::new(other.role(), other.content()),
    }
}

/// Keep only user and assistant messages; intermediate steps shown by the
/// client as system messages are never replayed to the agent.
pub fn history_from_wire(messages: &[WireMessage]) -> Vec<ChatTurn> {
    messages
        .iter()
        .filter(|message| message.role == "user" || message.role == "assistant")
        .map(to_internal)
        .collect()
}
