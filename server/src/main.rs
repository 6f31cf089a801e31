use std::sync::Arc;

use anyhow::Context;
use story_core::{StoryConfig, UreqTransport, WorkflowOrchestrator};
use story_server::logging::{self, LogFormat};
use story_server::AppState;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("STORY_CONFIG_FILE").unwrap_or_else(|_| "story".to_string());
    let config = StoryConfig::load(Some(&config_path)).context("loading configuration")?;
    logging::init_logging(LogFormat::from_name(&config.log_format));

    tracing::info!(
        api_url = %config.api_url,
        attempt_timeout_secs = config.attempt_timeout_secs,
        operation_timeout_secs = config.operation_timeout_secs,
        "loaded configuration"
    );

    let orchestrator = WorkflowOrchestrator::from_config(&config, Arc::new(UreqTransport::new()));
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "story server listening");

    story_server::run(listener, AppState::new(orchestrator, config.operation_timeout())).await?;
    Ok(())
}
