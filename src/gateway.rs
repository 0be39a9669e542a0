//! The gateway service shared by every request handler.

use crate::artifact::{Artifact, ArtifactFetcher, HttpArtifactFetcher};
use crate::config::Config;
use crate::correlator::{CorrelationOutcome, JobCorrelator};
use crate::error::{Error, Result};
use crate::message::JobRequest;
use crate::transport::{QueueClient, ServiceBusReceiver, ServiceBusSender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of polling for a job's artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieval {
    /// The job finished and its artifact was downloaded
    Ready(Artifact),
    /// The job's result has not arrived yet
    Pending,
}

/// Submits jobs, correlates their results and fetches the artifacts
///
/// Cloning is cheap; clones share connections and shutdown state.
#[derive(Clone)]
pub struct Gateway {
    correlator: JobCorrelator,
    fetcher: Arc<dyn ArtifactFetcher>,
    accepting_new: Arc<AtomicBool>,
}

impl Gateway {
    /// Open the Service Bus connections and the artifact client
    ///
    /// This is the only fallible step of startup; once it succeeds, request
    /// failures are reported per request.
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate()?;

        let sender = ServiceBusSender::connect(&config.queue)?;
        let receiver = ServiceBusReceiver::connect(&config.queue)?;
        let client = QueueClient::new(
            Arc::new(sender),
            Arc::new(receiver),
            config.queue.operation_timeout,
        );
        let fetcher = HttpArtifactFetcher::new(&config.artifact, config.retry.clone())?;

        tracing::info!(
            publish_queue = %config.queue.publish_queue,
            receive_queue = %config.queue.receive_queue,
            artifact_service = %config.artifact.base_url,
            "Gateway connected"
        );
        Ok(Self::from_parts(client, Arc::new(fetcher), config))
    }

    /// Assemble a gateway from already-built collaborators
    pub fn from_parts(
        client: QueueClient,
        fetcher: Arc<dyn ArtifactFetcher>,
        config: &Config,
    ) -> Self {
        Self {
            correlator: JobCorrelator::new(client, &config.queue),
            fetcher,
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether new jobs are still accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    /// Publish a job and return its correlation key
    pub async fn submit(&self, request: &JobRequest) -> Result<String> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        self.correlator.submit(request).await
    }

    /// Poll once for the result of `message_id`, downloading its artifact when ready
    pub async fn retrieve(&self, message_id: &str) -> Result<Retrieval> {
        if message_id.trim().is_empty() {
            return Err(Error::invalid_input(
                "message_id",
                "missing required parameter",
            ));
        }

        match self.correlator.correlate(message_id).await? {
            CorrelationOutcome::Ready(artifact_id) => {
                let artifact = self
                    .fetcher
                    .fetch_artifact(&artifact_id)
                    .await
                    .inspect_err(|e| {
                        // The result is already consumed; only the artifact id survives.
                        tracing::error!(
                            message_id,
                            artifact_id = %artifact_id,
                            error = %e,
                            "Artifact download failed after result was consumed"
                        );
                    })?;
                Ok(Retrieval::Ready(artifact))
            }
            CorrelationOutcome::Pending => Ok(Retrieval::Pending),
        }
    }

    /// Stop accepting jobs and close the broker connections
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.accepting_new.swap(false, Ordering::SeqCst) {
            tracing::info!("Gateway stopped accepting new jobs");
        }
        self.correlator.client().close().await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportError, UpstreamError};
    use crate::transport::{MemoryBroker, QueueSender};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::time::Duration;

    struct StaticFetcher(HashMap<&'static str, Artifact>);

    #[async_trait]
    impl ArtifactFetcher for StaticFetcher {
        async fn fetch_artifact(&self, artifact_id: &str) -> Result<Artifact> {
            self.0.get(artifact_id).cloned().ok_or_else(|| {
                UpstreamError::Status {
                    artifact_id: artifact_id.to_string(),
                    status: 404,
                }
                .into()
            })
        }
    }

    fn gateway() -> (MemoryBroker, Gateway) {
        let config = Config::default();
        let broker = MemoryBroker::new(Duration::from_secs(30));
        let client = QueueClient::new(
            Arc::new(broker.sender("jobs")),
            Arc::new(broker.receiver("results")),
            Duration::from_secs(5),
        );
        let fetcher = StaticFetcher(HashMap::from([(
            "artifact-1",
            Artifact {
                content_type: "image/png".to_string(),
                bytes: Bytes::from_static(b"png"),
            },
        )]));
        let gateway = Gateway::from_parts(client, Arc::new(fetcher), &config);
        (broker, gateway)
    }

    fn request() -> JobRequest {
        JobRequest {
            prompt: Some("p".into()),
            prompt_guidance: Some("1.0".into()),
            strength: Some("0.5".into()),
            uuid: Some("u1".into()),
            ..JobRequest::default()
        }
    }

    async fn publish_result(broker: &MemoryBroker, body: String) {
        broker
            .sender("results")
            .send(Bytes::from(body))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn submit_then_retrieve_returns_artifact() {
        let (broker, gateway) = gateway();

        let message_id = gateway.submit(&request()).await.unwrap();
        assert_eq!(gateway.retrieve(&message_id).await.unwrap(), Retrieval::Pending);

        publish_result(
            &broker,
            format!(r#"{{"message_id":"{message_id}","uuid_processed":"artifact-1"}}"#),
        )
        .await;

        match gateway.retrieve(&message_id).await.unwrap() {
            Retrieval::Ready(artifact) => {
                assert_eq!(artifact.content_type, "image/png");
                assert_eq!(artifact.bytes, Bytes::from_static(b"png"));
            }
            Retrieval::Pending => panic!("expected the artifact"),
        }
    }

    #[tokio::test]
    async fn empty_message_id_is_invalid() {
        let (_broker, gateway) = gateway();
        assert!(matches!(
            gateway.retrieve("  ").await,
            Err(Error::InvalidInput { ref field, .. }) if field == "message_id"
        ));
    }

    #[tokio::test]
    async fn unknown_artifact_surfaces_upstream_error() {
        let (broker, gateway) = gateway();
        publish_result(
            &broker,
            r#"{"message_id":"X","uuid_processed":"missing"}"#.to_string(),
        )
        .await;

        assert!(matches!(
            gateway.retrieve("X").await,
            Err(Error::Upstream(UpstreamError::Status { status: 404, .. }))
        ));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work_and_is_idempotent() {
        let (broker, gateway) = gateway();

        gateway.shutdown().await;
        gateway.shutdown().await;

        assert!(!gateway.is_accepting());
        assert!(matches!(
            gateway.submit(&request()).await,
            Err(Error::ShuttingDown)
        ));
        assert!(matches!(
            gateway.retrieve("X").await,
            Err(Error::Transport(TransportError::Closed))
        ));
        assert_eq!(broker.depth("jobs").await, 0);
    }
}
