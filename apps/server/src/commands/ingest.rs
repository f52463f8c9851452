use crate::ai::embedder::Embedder;
use crate::ai::selector;
use crate::ai::splitter::RecursiveCharacterTextSplitter;
use crate::ai::vector_store::{EmbeddingRecord, VectorStore};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::types::{IngestQuery, IngestRequest, IngestResponse};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

pub const DEMO_MODE_MESSAGE: &str = "Ingest is not supported in demo mode.\nPlease set up your own version of the repo here: https://github.com/langchain-ai/langchain-nextjs-template";
pub const MISSING_EMBEDDING_MODEL_MESSAGE: &str =
    "Must provide embedding model as URL parameter to /retrieval/ingest";

/// `POST /retrieval/ingest`
pub async fn ingest_document(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IngestQuery>,
    payload: std::result::Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>> {
    if state.config.demo_mode {
        return Err(AppError::DemoModeRestriction(DEMO_MODE_MESSAGE.to_string()));
    }

    let model_id = query
        .embedding_model
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::ConfigurationError(MISSING_EMBEDDING_MODEL_MESSAGE.to_string()))?;
    let Json(request) = payload?;

    let selection = selector::select(Some(&model_id));
    let embedder = Embedder::new(state.http.clone(), &state.config, &selection)?;

    let chunks = RecursiveCharacterTextSplitter::for_ingest()?.split_text(&request.text);
    if chunks.is_empty() {
        log::info!("Nothing to ingest for {}", selection.provider_id);
        return Ok(Json(IngestResponse { ok: true }));
    }

    let embeddings = embedder.embed_documents(&chunks).await?;
    let dimension = embeddings
        .first()
        .map(Vec::len)
        .ok_or_else(|| AppError::upstream(None, "Embedding provider returned no vectors"))?;

    let store = VectorStore::ensure(
        state.http.clone(),
        &state.config,
        &selection.collection_name,
        dimension,
    )
    .await?;

    let records = chunks
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(index, (content, embedding))| EmbeddingRecord {
            content,
            metadata: json!({ "chunk": index, "embeddingModel": selection.provider_id }),
            embedding,
        })
        .collect();
    let stored = store.upsert(records).await?;

    log::info!(
        "Ingested {} chunks into {}",
        stored,
        store.collection()
    );
    Ok(Json(IngestResponse { ok: true }))
}
