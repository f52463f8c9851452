use serde::Serialize;

/// Collection used when the request names no known embedding model
pub const DEFAULT_COLLECTION: &str = "default_collection";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAi,
    Nomic,
    Voyage,
    Mistral,
    HuggingFace,
    Cohere,
}

impl EmbeddingProvider {
    /// Environment variable holding this provider's API key
    pub fn credential_var(self) -> &'static str {
        match self {
            EmbeddingProvider::OpenAi => "OPENAI_API_KEY",
            EmbeddingProvider::Nomic => "NOMIC_API_KEY",
            EmbeddingProvider::Voyage => "VOYAGEAI_API_KEY",
            EmbeddingProvider::Mistral => "MISTRAL_API_KEY",
            EmbeddingProvider::HuggingFace => "HUGGINGFACEHUB_API_KEY",
            EmbeddingProvider::Cohere => "COHERE_API_KEY",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddingProvider::OpenAi => "openai",
            EmbeddingProvider::Nomic => "nomic",
            EmbeddingProvider::Voyage => "voyage",
            EmbeddingProvider::Mistral => "mistral",
            EmbeddingProvider::HuggingFace => "huggingface",
            EmbeddingProvider::Cohere => "cohere",
        }
    }
}

struct EmbeddingModelEntry {
    id: &'static str,
    provider: EmbeddingProvider,
    model: &'static str,
}

const fn entry(
    id: &'static str,
    provider: EmbeddingProvider,
    model: &'static str,
) -> EmbeddingModelEntry {
    EmbeddingModelEntry {
        id,
        provider,
        model,
    }
}

use EmbeddingProvider::{Cohere, HuggingFace, Mistral, Nomic, OpenAi, Voyage};

const EMBEDDING_MODELS: &[EmbeddingModelEntry] = &[
    entry("nomic", Nomic, "nomic-embed-text-v1"),
    entry("voyage", Voyage, "voyage-01"),
    entry("mistral", Mistral, "mistral-embed"),
    entry("huggingface", HuggingFace, "BAAI/bge-m3"),
    entry("cohere", Cohere, "embed-english-v3.0"),
    entry("openai", OpenAi, "text-embedding-ada-002"),
    entry("BAAI/bge-m3", HuggingFace, "BAAI/bge-m3"),
    entry("all-MiniLM-L6-v2", HuggingFace, "sentence-transformers/all-MiniLM-L6-v2"),
    entry("snowflake-arctic-embed-m", HuggingFace, "Snowflake/snowflake-arctic-embed-m"),
    entry("snowflake-arctic-embed-l", HuggingFace, "Snowflake/snowflake-arctic-embed-l"),
    entry(
        "snowflake-arctic-embed-m-long",
        HuggingFace,
        "Snowflake/snowflake-arctic-embed-m-long",
    ),
    entry("snowflake-arctic-embed-xs", HuggingFace, "Snowflake/snowflake-arctic-embed-xs"),
    entry("snowflake-arctic-embed-s", HuggingFace, "Snowflake/snowflake-arctic-embed-s"),
    entry(
        "snowflake-arctic-embed-m-v1.5",
        HuggingFace,
        "Snowflake/snowflake-arctic-embed-m-v1.5",
    ),
    entry("LaBSE", HuggingFace, "sentence-transformers/LaBSE"),
    entry("embed-english-v3.0", Cohere, "embed-english-v3.0"),
    entry("text-embedding-ada-002", OpenAi, "text-embedding-ada-002"),
    entry("text-embedding-3-large", OpenAi, "text-embedding-3-large"),
    entry("text-embedding-3-small", OpenAi, "text-embedding-3-small"),
];

/// Resolved embedding choice for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingProviderConfig {
    pub provider_id: String,
    pub provider: EmbeddingProvider,
    pub model: String,
    pub collection_name: String,
    pub credential_ref: &'static str,
}

impl EmbeddingProviderConfig {
    pub fn default_config() -> Self {
        Self {
            provider_id: "default".to_string(),
            provider: OpenAi,
            model: "text-embedding-ada-002".to_string(),
            collection_name: DEFAULT_COLLECTION.to_string(),
            credential_ref: OpenAi.credential_var(),
        }
    }

    fn from_entry(entry: &EmbeddingModelEntry) -> Self {
        Self {
            provider_id: entry.id.to_string(),
            provider: entry.provider,
            model: entry.model.to_string(),
            collection_name: collection_name_for(entry.id),
            credential_ref: entry.provider.credential_var(),
        }
    }
}

/// Exact, case-sensitive lookup
pub fn lookup(model_id: &str) -> Option<EmbeddingProviderConfig> {
    EMBEDDING_MODELS
        .iter()
        .find(|entry| entry.id == model_id)
        .map(EmbeddingProviderConfig::from_entry)
}

/// Unknown, empty or missing ids resolve to the default config, never an error.
pub fn select(model_id: Option<&str>) -> EmbeddingProviderConfig {
    match model_id.and_then(lookup) {
        Some(config) => config,
        None => {
            if let Some(id) = model_id.filter(|id| !id.is_empty()) {
                log::warn!("Unknown embedding model '{}', using default collection", id);
            }
            EmbeddingProviderConfig::default_config()
        }
    }
}

pub fn known_ids() -> impl Iterator<Item = &'static str> {
    EMBEDDING_MODELS.iter().map(|entry| entry.id)
}

/// `nomic` -> `nomic_collection`, `BAAI/bge-m3` -> `baai_bge_m3_collection`
pub fn collection_name_for(model_id: &str) -> String {
    let stem: String = model_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_collection", stem)
}
