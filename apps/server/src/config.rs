use std::collections::HashMap;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_QDRANT_URL: &str = "http://127.0.0.1:6333";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Credential environment variables read at startup
pub const CREDENTIAL_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "NOMIC_API_KEY",
    "VOYAGEAI_API_KEY",
    "MISTRAL_API_KEY",
    "HUGGINGFACEHUB_API_KEY",
    "COHERE_API_KEY",
];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    /// Ingest is refused while set
    pub demo_mode: bool,
    pub(crate) credentials: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            qdrant_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            demo_mode: false,
            credentials: HashMap::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let credentials = CREDENTIAL_VARS
            .iter()
            .filter_map(|name| read(name).map(|value| (name.to_string(), value)))
            .collect();

        Self {
            bind_addr: read("BIND_ADDR").unwrap_or(defaults.bind_addr),
            qdrant_url: read("QDRANT_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.qdrant_url),
            qdrant_api_key: read("QDRANT_API_KEY"),
            openai_base_url: read("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            anthropic_base_url: read("ANTHROPIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.anthropic_base_url),
            demo_mode: read("DEMO_MODE").is_some_and(|value| value == "true"),
            credentials,
        }
    }

    pub fn credential(&self, name: &str) -> Option<&str> {
        self.credentials.get(name).map(String::as_str)
    }

    pub fn with_credential(mut self, name: &str, value: &str) -> Self {
        self.credentials.insert(name.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.qdrant_url, DEFAULT_QDRANT_URL);
        assert!(config.qdrant_api_key.is_none());
        assert!(!config.demo_mode);
        assert!(config.credential("OPENAI_API_KEY").is_none());
    }

    #[test]
    fn demo_mode_requires_literal_true() {
        let on = AppConfig::from_lookup(lookup_from(&[("DEMO_MODE", "true")]));
        let off = AppConfig::from_lookup(lookup_from(&[("DEMO_MODE", "1")]));
        assert!(on.demo_mode);
        assert!(!off.demo_mode);
    }

    #[test]
    fn reads_credentials_and_trims_urls() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("QDRANT_URL", "https://qdrant.example.com/"),
            ("COHERE_API_KEY", "co-key"),
            ("MISTRAL_API_KEY", "   "),
        ]));
        assert_eq!(config.qdrant_url, "https://qdrant.example.com");
        assert_eq!(config.credential("COHERE_API_KEY"), Some("co-key"));
        assert!(config.credential("MISTRAL_API_KEY").is_none());
    }
}
