use crate::ai::chat_model::{ChatModel, ModelDelta, ToolDefinition};
use crate::ai::message::ChatTurn;
use crate::ai::tool::Tool;
use crate::error::{AppError, Result};
use crate::types::ToolCall;

use async_stream::try_stream;
use futures_util::{future, Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const AGENT_SYSTEM_TEMPLATE: &str = "You are a helpful production assistant at a major network television studio.

Always use the provided tool to look up an answer to a question, before relying on your own large language model knowledge.

When replying, make sure to include whether or not you used a tool in the reply, and describe how you used the tool. If you retrieved a document, cite it in the response.";

/// Reasoning steps allowed before the run is abandoned
pub const DEFAULT_MAX_STEPS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Idle,
    Reasoning,
    ToolCall,
    Responding,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Text produced by the model, safe to show the user
    ContentDelta(String),
    /// Partial tool-call arguments; never user-facing
    ToolCallDelta { index: usize, arguments: String },
    /// The model finished one step; carries the assembled assistant turn
    StepFinished(ChatTurn),
    ToolFinished(ChatTurn),
}

impl AgentEvent {
    /// The streaming filter: only non-empty model content is forwarded
    pub fn into_content(self) -> Option<String> {
        match self {
            AgentEvent::ContentDelta(text) if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

/// Tool-using conversational agent over a fixed system prompt
pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    system_prompt: String,
    max_steps: usize,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, tools: Vec<Arc<dyn Tool>>, system_prompt: &str) -> Self {
        Self {
            model,
            tools,
            system_prompt: system_prompt.to_string(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Run to completion and return the whole history: input turns, every
    /// assistant step, and every tool result
    pub async fn invoke(&self, history: Vec<ChatTurn>) -> Result<Vec<ChatTurn>> {
        let definitions = self.definitions();
        let mut messages = history;
        let mut phase = AgentPhase::Idle;

        for _ in 0..self.max_steps {
            enter(&mut phase, AgentPhase::Reasoning);
            let turn = self.model.invoke(&self.prompt(&messages), &definitions).await?;
            let tool_calls = turn.tool_calls().to_vec();
            messages.push(turn);

            if tool_calls.is_empty() {
                enter(&mut phase, AgentPhase::Responding);
                enter(&mut phase, AgentPhase::Done);
                return Ok(messages);
            }

            enter(&mut phase, AgentPhase::ToolCall);
            for call in &tool_calls {
                messages.push(self.run_tool(call).await?);
            }
        }

        Err(self.step_limit_error())
    }

    /// Drive the loop against the model's token stream, emitting every event
    /// in order. Consumes the agent so the stream can outlive the request
    /// handler's borrows.
    pub fn stream_events(
        self,
        history: Vec<ChatTurn>,
    ) -> impl Stream<Item = Result<AgentEvent>> + Send + 'static {
        try_stream! {
            let definitions = self.definitions();
            let mut messages = history;
            let mut phase = AgentPhase::Idle;

            for _ in 0..self.max_steps {
                enter(&mut phase, AgentPhase::Reasoning);
                let mut deltas = self.model.stream(&self.prompt(&messages), &definitions).await?;
                let mut content = String::new();
                let mut pending = PendingToolCalls::default();

                while let Some(delta) = deltas.next().await {
                    match delta? {
                        ModelDelta::Content(text) => {
                            content.push_str(&text);
                            yield AgentEvent::ContentDelta(text);
                        }
                        ModelDelta::ToolCallChunk { index, id, name, arguments } => {
                            pending.push(index, id, name, &arguments);
                            yield AgentEvent::ToolCallDelta { index, arguments };
                        }
                    }
                }

                let tool_calls = pending.finish()?;
                let turn = ChatTurn::Ai { content, tool_calls: tool_calls.clone() };
                messages.push(turn.clone());
                yield AgentEvent::StepFinished(turn);

                if tool_calls.is_empty() {
                    enter(&mut phase, AgentPhase::Responding);
                    enter(&mut phase, AgentPhase::Done);
                    return;
                }

                enter(&mut phase, AgentPhase::ToolCall);
                for call in &tool_calls {
                    let result = self.run_tool(call).await?;
                    messages.push(result.clone());
                    yield AgentEvent::ToolFinished(result);
                }
            }

            Err::<(), AppError>(self.step_limit_error())?;
        }
    }

    fn prompt(&self, history: &[ChatTurn]) -> Vec<ChatTurn> {
        let mut prompt = Vec::with_capacity(history.len() + 1);
        prompt.push(ChatTurn::system(self.system_prompt.clone()));
        prompt.extend(history.iter().cloned());
        prompt
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    async fn run_tool(&self, call: &ToolCall) -> Result<ChatTurn> {
        let content = match self.tools.iter().find(|tool| tool.name() == call.name) {
            Some(tool) => {
                log::info!("Calling tool {} ({})", call.name, call.id);
                tool.call(&call.args).await?
            }
            None => {
                let available: Vec<&str> = self.tools.iter().map(|tool| tool.name()).collect();
                log::warn!("Model requested unknown tool {}", call.name);
                format!(
                    "Error: {} is not a valid tool, try one of [{}].",
                    call.name,
                    available.join(", ")
                )
            }
        };

        Ok(ChatTurn::Tool {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content,
        })
    }

    fn step_limit_error(&self) -> AppError {
        AppError::AgentError(format!(
            "Agent stopped after {} reasoning steps without a final answer",
            self.max_steps
        ))
    }
}

/// Reduce an event stream to the text the user should see
pub fn content_stream<S>(events: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<AgentEvent>> + Send,
{
    events.filter_map(|event| {
        future::ready(match event {
            Ok(event) => event.into_content().map(Ok),
            Err(error) => Some(Err(error)),
        })
    })
}

fn enter(phase: &mut AgentPhase, next: AgentPhase) {
    log::debug!("Agent {:?} -> {:?}", phase, next);
    *phase = next;
}

#[derive(Default)]
struct PendingToolCalls {
    calls: BTreeMap<usize, PendingToolCall>,
}

#[derive(Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PendingToolCalls {
    fn push(&mut self, index: usize, id: Option<String>, name: Option<String>, arguments: &str) {
        let call = self.calls.entry(index).or_default();
        if id.is_some() {
            call.id = id;
        }
        if name.is_some() {
            call.name = name;
        }
        call.arguments.push_str(arguments);
    }

    fn finish(self) -> Result<Vec<ToolCall>> {
        self.calls
            .into_iter()
            .map(|(index, call)| {
                let name = call.name.ok_or_else(|| {
                    AppError::upstream(None, format!("Tool call {} arrived without a name", index))
                })?;
                let args: Value = if call.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&call.arguments).map_err(|error| {
                        AppError::upstream(
                            None,
                            format!("Invalid tool call arguments {}: {}", call.arguments, error),
                        )
                    })?
                };
                Ok(ToolCall {
                    id: call.id.unwrap_or_else(|| format!("call_{}", index)),
                    name,
                    args,
                })
            })
            .collect()
    }
}
