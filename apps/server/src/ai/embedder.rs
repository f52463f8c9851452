use crate::ai::selector::{EmbeddingProvider, EmbeddingProviderConfig};
use crate::config::AppConfig;
use crate::error::{AppError, Result};

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const NOMIC_ENDPOINT: &str = "https://api-atlas.nomic.ai/v1/embedding/text";
const VOYAGE_ENDPOINT: &str = "https://api.voyageai.com/v1/embeddings";
const MISTRAL_ENDPOINT: &str = "https://api.mistral.ai/v1/embeddings";
const HUGGINGFACE_ENDPOINT: &str = "https://api-inference.huggingface.co/models";
const COHERE_ENDPOINT: &str = "https://api.cohere.ai/v1/embed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Document,
    Query,
}

/// Turns text into vectors with the provider chosen for the request
pub struct Embedder {
    http: Client,
    provider: EmbeddingProvider,
    model: String,
    api_key: String,
    openai_base_url: String,
}

impl Embedder {
    pub fn new(http: Client, config: &AppConfig, selection: &EmbeddingProviderConfig) -> Result<Self> {
        let api_key = config
            .credential(selection.credential_ref)
            .ok_or_else(|| {
                AppError::ConfigurationError(format!(
                    "Missing {} for embedding provider {}",
                    selection.credential_ref,
                    selection.provider.as_str()
                ))
            })?
            .to_string();

        Ok(Self {
            http,
            provider: selection.provider,
            model: selection.model.clone(),
            api_key,
            openai_base_url: config.openai_base_url.clone(),
        })
    }

    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size(self.provider)) {
            vectors.extend(self.embed_batch(batch, InputKind::Document).await?);
        }
        Ok(vectors)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()], InputKind::Query).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::upstream(None, "Embedding service returned no vector"))
    }

    async fn embed_batch(&self, batch: &[String], kind: InputKind) -> Result<Vec<Vec<f32>>> {
        let (url, body) =
            build_request(self.provider, &self.model, batch, kind, &self.openai_base_url);
        log::debug!(
            "Embedding {} input(s) with {} model {}",
            batch.len(),
            self.provider.as_str(),
            self.model
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| AppError::upstream(None, error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(AppError::upstream(
                Some(status.as_u16()),
                format!("Embedding request failed: {}", body),
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| AppError::upstream(None, error.to_string()))?;
        let vectors = parse_response(self.provider, payload)?;

        if vectors.len() != batch.len() {
            return Err(AppError::upstream(
                None,
                "Embedding service returned mismatched results",
            ));
        }

        Ok(vectors)
    }
}

fn batch_size(provider: EmbeddingProvider) -> usize {
    match provider {
        EmbeddingProvider::OpenAi | EmbeddingProvider::Mistral => 512,
        EmbeddingProvider::Nomic => 400,
        EmbeddingProvider::Voyage => 8,
        EmbeddingProvider::HuggingFace => 128,
        EmbeddingProvider::Cohere => 48,
    }
}

fn build_request(
    provider: EmbeddingProvider,
    model: &str,
    batch: &[String],
    kind: InputKind,
    openai_base_url: &str,
) -> (String, Value) {
    match provider {
        EmbeddingProvider::OpenAi => (
            format!("{}/v1/embeddings", openai_base_url),
            json!({ "model": model, "input": batch }),
        ),
        EmbeddingProvider::Nomic => {
            let task_type = match kind {
                InputKind::Document => "search_document",
                InputKind::Query => "search_query",
            };
            (
                NOMIC_ENDPOINT.to_string(),
                json!({ "model": model, "texts": batch, "task_type": task_type }),
            )
        }
        // Voyage is always asked for document embeddings, queries included.
        EmbeddingProvider::Voyage => (
            VOYAGE_ENDPOINT.to_string(),
            json!({ "model": model, "input": batch, "input_type": "document" }),
        ),
        EmbeddingProvider::Mistral => (
            MISTRAL_ENDPOINT.to_string(),
            json!({ "model": model, "input": batch, "encoding_format": "float" }),
        ),
        EmbeddingProvider::HuggingFace => (
            format!("{}/{}", HUGGINGFACE_ENDPOINT, model),
            json!({ "inputs": batch, "options": { "wait_for_model": true } }),
        ),
        EmbeddingProvider::Cohere => {
            let input_type = match kind {
                InputKind::Document => "search_document",
                InputKind::Query => "search_query",
            };
            (
                COHERE_ENDPOINT.to_string(),
                json!({ "model": model, "texts": batch, "input_type": input_type }),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct DataEmbeddingResponse {
    data: Vec<DataEmbedding>,
}

#[derive(Debug, Deserialize)]
struct DataEmbedding {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embeddings: Vec<Vec<f32>>,
}

fn parse_response(provider: EmbeddingProvider, payload: Value) -> Result<Vec<Vec<f32>>> {
    let malformed = |error: serde_json::Error| {
        AppError::upstream(
            None,
            format!("Unexpected {} embedding response: {}", provider.as_str(), error),
        )
    };

    match provider {
        EmbeddingProvider::OpenAi | EmbeddingProvider::Voyage | EmbeddingProvider::Mistral => {
            let mut response: DataEmbeddingResponse =
                serde_json::from_value(payload).map_err(malformed)?;
            response.data.sort_by_key(|item| item.index.unwrap_or(usize::MAX));
            Ok(response.data.into_iter().map(|item| item.embedding).collect())
        }
        EmbeddingProvider::Nomic | EmbeddingProvider::Cohere => {
            let response: EmbeddingsResponse = serde_json::from_value(payload).map_err(malformed)?;
            Ok(response.embeddings)
        }
        EmbeddingProvider::HuggingFace => serde_json::from_value(payload).map_err(malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::selector;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn cohere_request_distinguishes_query_and_document() {
        let batch = texts(&["pilot episode"]);
        let (url, doc) = build_request(
            EmbeddingProvider::Cohere,
            "embed-english-v3.0",
            &batch,
            InputKind::Document,
            "",
        );
        let (_, query) = build_request(
            EmbeddingProvider::Cohere,
            "embed-english-v3.0",
            &batch,
            InputKind::Query,
            "",
        );
        assert_eq!(url, COHERE_ENDPOINT);
        assert_eq!(doc["input_type"], "search_document");
        assert_eq!(query["input_type"], "search_query");
    }

    #[test]
    fn openai_request_uses_configured_base_url() {
        let (url, body) = build_request(
            EmbeddingProvider::OpenAi,
            "text-embedding-3-small",
            &texts(&["a", "b"]),
            InputKind::Document,
            "http://localhost:9999",
        );
        assert_eq!(url, "http://localhost:9999/v1/embeddings");
        assert_eq!(body["input"], json!(["a", "b"]));
    }

    #[test]
    fn huggingface_request_targets_model_path() {
        let (url, _) = build_request(
            EmbeddingProvider::HuggingFace,
            "sentence-transformers/LaBSE",
            &texts(&["x"]),
            InputKind::Query,
            "",
        );
        assert_eq!(url, format!("{}/sentence-transformers/LaBSE", HUGGINGFACE_ENDPOINT));
    }

    #[test]
    fn data_responses_are_reordered_by_index() {
        let payload = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_response(EmbeddingProvider::OpenAi, payload).expect("parse");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn parses_embeddings_and_bare_array_shapes() {
        let nomic = parse_response(EmbeddingProvider::Nomic, json!({ "embeddings": [[0.5]] }))
            .expect("nomic");
        assert_eq!(nomic, vec![vec![0.5]]);

        let hf = parse_response(EmbeddingProvider::HuggingFace, json!([[0.25, 0.75]]))
            .expect("huggingface");
        assert_eq!(hf, vec![vec![0.25, 0.75]]);
    }

    #[test]
    fn malformed_response_is_upstream_error() {
        let error = parse_response(EmbeddingProvider::Cohere, json!({ "message": "bad key" }))
            .expect_err("should fail");
        assert!(matches!(error, AppError::UpstreamError { status: None, .. }));
    }

    #[test]
    fn missing_credential_is_configuration_error() {
        let config = AppConfig::default();
        let selection = selector::select(Some("mistral"));
        let error = Embedder::new(Client::new(), &config, &selection)
            .err()
            .expect("missing key");
        assert!(matches!(error, AppError::ConfigurationError(_)));
        assert!(error.to_string().contains("MISTRAL_API_KEY"));
    }
}
