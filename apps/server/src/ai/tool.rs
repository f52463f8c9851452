use crate::ai::chat_model::ToolDefinition;
use crate::ai::vector_store::Retriever;
use crate::error::{AppError, Result};
use crate::types::RetrievedDocument;

use async_trait::async_trait;
use serde_json::{json, Value};

pub const RETRIEVAL_TOOL_NAME: &str = "vector_database_retrieval";
pub const RETRIEVAL_TOOL_DESCRIPTION: &str =
    "Retrieves documents from a vector database that are relevant to the user query";

/// A named capability the agent may call with JSON arguments
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    async fn call(&self, args: &Value) -> Result<String>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Anything that can answer a free-text similarity query
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>>;
}

#[async_trait]
impl DocumentSearch for Retriever {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        Retriever::search(self, query).await
    }
}

pub struct RetrieverTool<S> {
    search: S,
}

impl<S: DocumentSearch> RetrieverTool<S> {
    pub fn new(search: S) -> Self {
        Self { search }
    }
}

#[async_trait]
impl<S: DocumentSearch> Tool for RetrieverTool<S> {
    fn name(&self) -> &str {
        RETRIEVAL_TOOL_NAME
    }

    fn description(&self) -> &str {
        RETRIEVAL_TOOL_DESCRIPTION
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "query to look up in retriever"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, args: &Value) -> Result<String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .or_else(|| args.as_str())
            .ok_or_else(|| {
                AppError::AgentError(format!("{} expects a string query, got {}", RETRIEVAL_TOOL_NAME, args))
            })?;

        let documents = self.search.search(query).await?;
        Ok(documents
            .into_iter()
            .map(|document| document.page_content)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}
