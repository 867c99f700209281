use bfsi_claim_orchestrator::{api::start_server, config::AppConfig, graph::Orchestrator};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables before reading RUST_LOG
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    if config.model.api_key.is_empty() {
        warn!("GEMINI_API_KEY not set, model calls will fail and fallbacks will be used");
    }

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
    info!(model = %config.model.name, "Orchestrator initialized");

    start_server(orchestrator, &config.server.bind_addr()).await?;

    Ok(())
}
