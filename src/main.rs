use job_gateway::{Config, Gateway, serve_until_signal};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Log level comes from `RUST_LOG`, defaulting to `info`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is normal outside local development.
    let dotenv = dotenvy::dotenv();
    init_tracing();
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded environment file");
    }

    let config = Arc::new(Config::from_env()?);
    let gateway = Arc::new(Gateway::connect(&config).await?);

    serve_until_signal(gateway, config).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
