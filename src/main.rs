use std::sync::Arc;

use tracing::info;

use bayline::config::EngineConfig;
use bayline::tenant::TenantManager;
use bayline::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env();
    bayline::observability::init(config.metrics_port)?;
    std::fs::create_dir_all(&config.data_dir)?;

    info!("bayline serving JSON lines on stdin/stdout");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lock_timeout: {:?}", config.lock_timeout);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let tenants = Arc::new(TenantManager::new(config));
    let serve = wire::process_stream(tokio::io::stdin(), tokio::io::stdout(), tenants);

    tokio::select! {
        result = serve => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    info!("bayline stopped");
    Ok(())
}
