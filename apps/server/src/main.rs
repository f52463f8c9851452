use retrieval_agent_lib::config::AppConfig;
use retrieval_agent_lib::router;
use retrieval_agent_lib::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting retrieval agent server");

    let config = AppConfig::from_env();
    if config.demo_mode {
        log::warn!("DEMO_MODE is enabled, ingest requests will be refused");
    }
    log::info!("Using Qdrant at {}", config.qdrant_url);

    let state = AppState::new(config)?;
    router::run_server(state).await
}
