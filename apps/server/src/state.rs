use crate::config::AppConfig;
use crate::error::Result;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared, read-only state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Pooled client reused for every provider and Qdrant call
    pub http: Client,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }
}
