use crate::ai::agent::{content_stream, Agent, AGENT_SYSTEM_TEMPLATE};
use crate::ai::chat_model::{create_chat_model, ChatModelConfig};
use crate::ai::embedder::Embedder;
use crate::ai::message::{history_from_wire, to_wire, ChatTurn};
use crate::ai::selector;
use crate::ai::tool::{RetrieverTool, Tool};
use crate::ai::vector_store::VectorStore;
use crate::error::Result;
use crate::state::AppState;
use crate::types::{AgentChatQuery, AgentChatRequest, AgentChatResponse};

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::sync::Arc;

const STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// `POST /chat/retrieval-agent`
///
/// Streams the final answer as plain text, or returns every turn of the run
/// as JSON when `show_intermediate_steps` is set.
pub async fn retrieval_agent_chat(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AgentChatQuery>,
    payload: std::result::Result<Json<AgentChatRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = payload?;
    let history = history_from_wire(&request.messages);
    let agent = build_agent(&state, &query).await?;

    if request.wants_intermediate_steps() {
        return batch_answer(agent, history).await;
    }

    stream_answer(agent, history).await
}

async fn batch_answer(agent: Agent, history: Vec<ChatTurn>) -> Result<Response> {
    let turns = agent.invoke(history).await?;
    log::info!("Agent run finished with {} turns", turns.len());
    let response = AgentChatResponse {
        messages: turns.iter().map(to_wire).collect(),
    };
    Ok(Json(response).into_response())
}

async fn build_agent(state: &AppState, query: &AgentChatQuery) -> Result<Agent> {
    let chat = ChatModelConfig::select(query.chat_model.as_deref());
    let model = create_chat_model(state.http.clone(), &state.config, &chat)?;

    let embedding = selector::select(query.embedding_model.as_deref());
    let embedder = Embedder::new(state.http.clone(), &state.config, &embedding)?;
    let store =
        VectorStore::open(state.http.clone(), &state.config, &embedding.collection_name).await?;

    log::info!(
        "Chat with {} over collection {} ({})",
        model.model_name(),
        store.collection(),
        embedding.provider_id
    );

    let tool: Arc<dyn Tool> = Arc::new(RetrieverTool::new(store.as_retriever(embedder)));
    Ok(Agent::new(model, vec![tool], AGENT_SYSTEM_TEMPLATE))
}

/// The first chunk is awaited before responding so failures before any
/// output still get a proper error status. Later failures end the body.
async fn stream_answer(agent: Agent, history: Vec<ChatTurn>) -> Result<Response> {
    let mut chunks = Box::pin(content_stream(agent.stream_events(history)));
    let first = chunks.next().await.transpose()?;

    let body = stream::iter(first.map(Ok))
        .chain(chunks)
        .map(|chunk| {
            chunk
                .map(Bytes::from)
                .inspect_err(|error| log::error!("Agent stream aborted: {}", error))
        });

    Ok((
        [(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)],
        Body::from_stream(body),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::chat_model::{ChatModel, DeltaStream, ModelDelta, ToolDefinition};
    use crate::error::AppError;
    use crate::types::ToolCall;

    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Streams one scripted step; `invoke` replays scripted turns
    #[derive(Default)]
    struct FakeModel {
        stream_error: Option<u16>,
        deltas: Mutex<Vec<Result<ModelDelta>>>,
        turns: Mutex<VecDeque<ChatTurn>>,
    }

    #[async_trait]
    impl ChatModel for FakeModel {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn invoke(&self, _messages: &[ChatTurn], _tools: &[ToolDefinition]) -> Result<ChatTurn> {
            self.turns
                .lock()
                .expect("lock")
                .pop_front()
                .ok_or_else(|| AppError::upstream(Some(500), "no more turns"))
        }

        async fn stream(&self, _messages: &[ChatTurn], _tools: &[ToolDefinition]) -> Result<DeltaStream> {
            if let Some(status) = self.stream_error {
                return Err(AppError::upstream(Some(status), "rate limited"));
            }
            let deltas = std::mem::take(&mut *self.deltas.lock().expect("lock"));
            Ok(Box::pin(stream::iter(deltas)))
        }
    }

    struct ScheduleTool;

    #[async_trait]
    impl Tool for ScheduleTool {
        fn name(&self) -> &str {
            "vector_database_retrieval"
        }

        fn description(&self) -> &str {
            "schedule lookup"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object" })
        }

        async fn call(&self, _args: &Value) -> Result<String> {
            Ok("Taping starts at 4pm.".to_string())
        }
    }

    fn agent(model: FakeModel) -> Agent {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(ScheduleTool)];
        Agent::new(Arc::new(model), tools, AGENT_SYSTEM_TEMPLATE)
    }

    fn streaming(deltas: Vec<Result<ModelDelta>>) -> FakeModel {
        FakeModel {
            deltas: Mutex::new(deltas),
            ..FakeModel::default()
        }
    }

    fn content(text: &str) -> Result<ModelDelta> {
        Ok(ModelDelta::Content(text.to_string()))
    }

    #[tokio::test]
    async fn failure_before_output_keeps_upstream_status() {
        let model = FakeModel {
            stream_error: Some(429),
            ..FakeModel::default()
        };
        match stream_answer(agent(model), vec![ChatTurn::human("hi")]).await {
            Err(error) => assert_eq!(error.status(), StatusCode::TOO_MANY_REQUESTS),
            Ok(_) => panic!("expected an error before the response head"),
        }
    }

    #[tokio::test]
    async fn streamed_answer_is_plain_text() {
        let model = streaming(vec![content("a"), content("b")]);
        let response = match stream_answer(agent(model), vec![ChatTurn::human("hi")]).await {
            Ok(response) => response,
            Err(error) => panic!("stream failed: {}", error),
        };

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(&body[..], b"ab");
    }

    #[tokio::test]
    async fn failure_after_output_ends_the_body() {
        let model = streaming(vec![content("a"), Err(AppError::upstream(None, "x"))]);
        let response = match stream_answer(agent(model), vec![ChatTurn::human("hi")]).await {
            Ok(response) => response,
            Err(error) => panic!("first chunk should succeed: {}", error),
        };

        assert_eq!(response.status(), StatusCode::OK);
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
    }

    #[tokio::test]
    async fn batch_answer_lists_every_turn() {
        let model = FakeModel {
            turns: Mutex::new(VecDeque::from([
                ChatTurn::Ai {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "call_1".to_string(),
                        name: "vector_database_retrieval".to_string(),
                        args: json!({ "query": "taping" }),
                    }],
                },
                ChatTurn::ai("I used vector_database_retrieval: taping starts at 4pm."),
            ])),
            ..FakeModel::default()
        };
        let response = match batch_answer(agent(model), vec![ChatTurn::human("When is taping?")]).await {
            Ok(response) => response,
            Err(error) => panic!("batch failed: {}", error),
        };
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        let messages = body["messages"].as_array().expect("messages");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["tool_calls"][0]["name"], "vector_database_retrieval");
        assert_eq!(messages[1]["tool_calls"][0]["args"]["query"], "taping");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["content"], "Taping starts at 4pm.");
        assert_eq!(messages[3]["tool_calls"], json!([]));
    }
}
