use crate::ai::embedder::Embedder;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::types::RetrievedDocument;

use blake3::Hasher;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Documents returned per retrieval when the caller does not say otherwise
pub const DEFAULT_TOP_K: usize = 4;

/// Handle to one Qdrant collection
pub struct VectorStore {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub content: String,
    pub metadata: Value,
    pub embedding: Vec<f32>,
}

impl VectorStore {
    fn handle(http: Client, config: &AppConfig, collection: &str) -> Self {
        Self {
            http,
            base_url: config.qdrant_url.clone(),
            api_key: config.qdrant_api_key.clone(),
            collection: collection.to_string(),
        }
    }

    /// Bind to an existing collection. Fails if Qdrant is unreachable or the
    /// collection is missing.
    pub async fn open(http: Client, config: &AppConfig, collection: &str) -> Result<Self> {
        let store = Self::handle(http, config, collection);
        if !store.collection_exists().await? {
            return Err(AppError::ConnectionError(format!(
                "Collection {} does not exist",
                collection
            )));
        }
        Ok(store)
    }

    /// Bind to a collection, creating it with cosine distance if needed
    pub async fn ensure(
        http: Client,
        config: &AppConfig,
        collection: &str,
        dimension: usize,
    ) -> Result<Self> {
        let store = Self::handle(http, config, collection);
        if store.collection_exists().await? {
            return Ok(store);
        }

        log::info!(
            "Creating collection {} with dimension {}",
            collection,
            dimension
        );
        let response = store
            .request(reqwest::Method::PUT, &store.collection_url())
            .json(&json!({ "vectors": { "size": dimension, "distance": "Cosine" } }))
            .send()
            .await
            .map_err(|error| AppError::ConnectionError(error.to_string()))?;
        expect_success(response, "create collection").await?;

        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let points: Vec<Point> = records
            .into_iter()
            .map(|record| Point {
                id: point_id(&record.content),
                vector: record.embedding,
                payload: json!({ "content": record.content, "metadata": record.metadata }),
            })
            .collect();
        let count = points.len();

        let url = format!("{}/points?wait=true", self.collection_url());
        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(&UpsertRequest { points })
            .send()
            .await
            .map_err(|error| AppError::ConnectionError(error.to_string()))?;
        expect_success(response, "upsert points").await?;

        Ok(count)
    }

    /// Nearest neighbours, highest score first as ranked by Qdrant
    pub async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<RetrievedDocument>> {
        let url = format!("{}/points/search", self.collection_url());
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({
                "vector": query_embedding,
                "limit": top_k,
                "with_payload": true
            }))
            .send()
            .await
            .map_err(|error| AppError::ConnectionError(error.to_string()))?;
        let response = expect_success(response, "search").await?;

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|error| AppError::ConnectionError(error.to_string()))?;

        Ok(payload.result.into_iter().map(ScoredPoint::into_document).collect())
    }

    pub fn as_retriever(self, embedder: Embedder) -> Retriever {
        Retriever {
            store: self,
            embedder,
            top_k: DEFAULT_TOP_K,
        }
    }

    async fn collection_exists(&self) -> Result<bool> {
        let response = self
            .request(reqwest::Method::GET, &self.collection_url())
            .send()
            .await
            .map_err(|error| {
                AppError::ConnectionError(format!("Qdrant unreachable at {}: {}", self.base_url, error))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(response, "get collection").await?;
        Ok(true)
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match self.api_key {
            Some(ref key) => builder.header("api-key", key),
            None => builder,
        }
    }
}

/// Similarity search over one collection, embedding the query first
pub struct Retriever {
    store: VectorStore,
    embedder: Embedder,
    top_k: usize,
}

impl Retriever {
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        let query_embedding = self.embedder.embed_query(query).await?;
        let documents = self.store.search(&query_embedding, self.top_k).await?;
        log::debug!(
            "Retrieved {} document(s) from {}",
            documents.len(),
            self.store.collection()
        );
        Ok(documents)
    }
}

async fn expect_success(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(AppError::ConnectionError(format!(
        "Qdrant {} failed ({}): {}",
        action,
        status,
        body.trim()
    )))
}

/// Identical chunk text always maps to the same point
fn point_id(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest.as_bytes()[..16]);
    Uuid::from_bytes(bytes).to_string()
}

#[derive(Debug, Serialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: Value,
}

#[derive(Debug, Serialize)]
struct UpsertRequest {
    points: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

impl ScoredPoint {
    fn into_document(self) -> RetrievedDocument {
        let id = match self.id {
            Value::String(id) => id,
            other => other.to_string(),
        };
        let mut payload = self.payload.unwrap_or(Value::Null);
        let page_content = payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let metadata = payload
            .get_mut("metadata")
            .map(Value::take)
            .unwrap_or_else(|| json!({}));

        RetrievedDocument {
            id,
            page_content,
            metadata,
            score: self.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_deterministic_uuids() {
        let first = point_id("The pilot airs on Thursday.");
        let second = point_id("The pilot airs on Thursday.");
        let other = point_id("The pilot airs on Friday.");
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn scored_point_maps_payload_fields() {
        let raw = json!({
            "result": [
                {
                    "id": "5c56c793-69f3-4fbf-87e6-c4bf54c28c26",
                    "score": 0.91,
                    "payload": { "content": "Ratings rose 4%.", "metadata": { "chunk": 2 } }
                },
                { "id": 17, "score": 0.42 }
            ],
            "status": "ok"
        });
        let response: SearchResponse = serde_json::from_value(raw).expect("parse");
        let docs: Vec<RetrievedDocument> =
            response.result.into_iter().map(ScoredPoint::into_document).collect();

        assert_eq!(docs[0].page_content, "Ratings rose 4%.");
        assert_eq!(docs[0].metadata, json!({ "chunk": 2 }));
        assert_eq!(docs[1].id, "17");
        assert_eq!(docs[1].page_content, "");
        assert_eq!(docs[1].metadata, json!({}));
    }

    #[tokio::test]
    async fn open_fails_with_connection_error_when_unreachable() {
        let config = AppConfig {
            qdrant_url: "http://127.0.0.1:1".to_string(),
            ..AppConfig::default()
        };
        let error = VectorStore::open(Client::new(), &config, "nomic_collection")
            .await
            .err()
            .expect("unreachable");
        assert!(matches!(error, AppError::ConnectionError(_)));
        assert_eq!(error.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
