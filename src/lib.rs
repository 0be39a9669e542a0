//! # job-gateway
//!
//! HTTP gateway that hands long-running jobs to a queue-backed worker and
//! lets clients poll for the result.
//!
//! A submission is published to the job queue under a correlation key
//! (`<unix-seconds>-<uuid>`) and the key is returned at once. The worker
//! later publishes a result naming an artifact. Each poll drains one batch
//! from the result queue, consumes only the result carrying the polled key,
//! and downloads the artifact it names.
//!
//! ## Quick Start
//!
//! ```no_run
//! use job_gateway::{Config, Gateway, serve_until_signal};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::from_env()?);
//!     let gateway = Arc::new(Gateway::connect(&config).await?);
//!
//!     // Serves until SIGINT/SIGTERM, then closes the broker connections
//!     serve_until_signal(gateway, config).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// HTTP API
pub mod api;
/// Artifact service client
pub mod artifact;
/// Configuration types
pub mod config;
/// Job submission and result correlation
pub mod correlator;
/// Error types
pub mod error;
/// Gateway service
pub mod gateway;
/// Job and result message schema
pub mod message;
/// Retry logic with exponential backoff
pub mod retry;
/// Queue transport capabilities and adapters
pub mod transport;

pub use artifact::{Artifact, ArtifactFetcher, HttpArtifactFetcher};
pub use config::Config;
pub use correlator::{CorrelationOutcome, JobCorrelator};
pub use error::{ApiError, Error, ErrorDetail, Result, ToHttpStatus, TransportError, UpstreamError};
pub use gateway::{Gateway, Retrieval};
pub use message::{JobRequest, Message, ResultMessage};
pub use transport::{MemoryBroker, QueueClient, QueueReceiver, QueueSender};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Serve the HTTP API until a termination signal, then shut the gateway down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// In-flight requests finish before the broker connections are closed.
pub async fn serve_until_signal(gateway: Arc<Gateway>, config: Arc<Config>) -> Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.cancel();
        }
    });

    let served = api::start_api_server(gateway.clone(), config, shutdown).await;
    gateway.shutdown().await;
    served
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
