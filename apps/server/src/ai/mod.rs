pub mod agent;
pub mod anthropic;
pub mod chat_model;
pub mod embedder;
pub mod message;
pub mod openai;
pub mod selector;
pub mod splitter;
pub mod tool;
pub mod vector_store;

pub use agent::{content_stream, Agent, AgentEvent, AgentPhase, AGENT_SYSTEM_TEMPLATE};
pub use chat_model::{create_chat_model, ChatModel, ChatModelConfig, ChatProvider, ModelDelta};
pub use embedder::{Embedder, InputKind};
pub use message::ChatTurn;
pub use selector::{EmbeddingProvider, EmbeddingProviderConfig};
pub use splitter::RecursiveCharacterTextSplitter;
pub use tool::{DocumentSearch, RetrieverTool, Tool};
pub use vector_store::{EmbeddingRecord, Retriever, VectorStore};
