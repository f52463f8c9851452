pub mod chat;
pub mod ingest;

pub use chat::retrieval_agent_chat;
pub use ingest::ingest_document;
