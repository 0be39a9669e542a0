//! Job correlation engine
//!
//! [`JobCorrelator::submit`] publishes a job under a correlation key and
//! returns immediately. [`JobCorrelator::correlate`] drains one batch from the
//! result queue and consumes at most the one result whose `message_id` equals
//! the key being polled for. Everything else in the batch is left for later
//! polls: non-matching results are released, undecodable ones are skipped.

use crate::config::QueueConfig;
use crate::error::Result;
use crate::message::{JobRequest, Message, ResultMessage};
use crate::transport::{DeliveryHandle, QueueClient};
use bytes::Bytes;
use chrono::{DateTime, Utc};

#[cfg(test)]
mod tests;

/// Result of scanning one batch for a correlation key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// The result was found and consumed; carries the artifact identifier
    Ready(String),
    /// No matching result in this batch
    Pending,
}

impl CorrelationOutcome {
    /// `(artifact_id, found)` view; the id is empty when nothing was found
    pub fn found(&self) -> (&str, bool) {
        match self {
            Self::Ready(artifact_id) => (artifact_id, true),
            Self::Pending => ("", false),
        }
    }
}

/// Publishes jobs and matches their results
#[derive(Clone)]
pub struct JobCorrelator {
    client: QueueClient,
    batch_size: usize,
    release_unmatched: bool,
}

impl JobCorrelator {
    /// Create a correlator over `client`, scanning batches as configured
    pub fn new(client: QueueClient, config: &QueueConfig) -> Self {
        Self {
            client,
            batch_size: config.receive_batch_size.max(1),
            release_unmatched: config.release_unmatched,
        }
    }

    /// The queue connections this correlator uses
    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    /// Validate and publish a job, returning its correlation key
    ///
    /// The key is returned as soon as the broker accepted the message; nothing
    /// waits for the worker.
    pub async fn submit(&self, request: &JobRequest) -> Result<String> {
        self.submit_at(request, Utc::now()).await
    }

    /// [`JobCorrelator::submit`] with an explicit submission time
    pub async fn submit_at(&self, request: &JobRequest, now: DateTime<Utc>) -> Result<String> {
        let message = Message::build(request, now)?;
        let body = Bytes::from(message.encode()?);
        self.client.send(body).await?;

        tracing::info!(
            message_id = %message.message_id,
            uuid = %message.uuid,
            model_type = %message.model_type,
            "Job submitted"
        );
        Ok(message.message_id)
    }

    /// Scan one batch of results for the job keyed `message_id`
    ///
    /// On a match the delivery is acknowledged before its artifact id is
    /// read, so a match without a usable `uuid_processed` still consumes the
    /// message and fails with [`crate::Error::MalformedMessage`].
    pub async fn correlate(&self, message_id: &str) -> Result<CorrelationOutcome> {
        let batch = self.client.receive_batch(self.batch_size).await?;
        if batch.is_empty() {
            tracing::debug!(message_id, "No results waiting");
            return Ok(CorrelationOutcome::Pending);
        }

        let received = batch.len();
        let mut unmatched: Vec<DeliveryHandle> = Vec::new();
        let mut matched = None;

        for delivery in batch {
            let result = match ResultMessage::decode(&delivery.body) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(
                        broker_message_id = %delivery.handle.message_id,
                        delivery_count = delivery.delivery_count,
                        error = %e,
                        "Skipping undecodable result"
                    );
                    continue;
                }
            };

            // Only the first match is consumed; duplicates wait for a later poll.
            if matched.is_none() && result.matches(message_id) {
                matched = Some((delivery.handle, result));
            } else {
                unmatched.push(delivery.handle);
            }
        }

        let acknowledged = match &matched {
            Some((handle, _)) => self.client.acknowledge(handle).await,
            None => Ok(()),
        };
        self.release_all(&unmatched).await;
        acknowledged?;

        match matched.map(|(_, result)| result) {
            Some(result) => {
                let artifact_id = result.artifact_id()?;
                tracing::info!(message_id, artifact_id, "Job result ready");
                Ok(CorrelationOutcome::Ready(artifact_id.to_string()))
            }
            None => {
                tracing::debug!(message_id, received, "No matching result in batch");
                Ok(CorrelationOutcome::Pending)
            }
        }
    }

    /// Give up locks on results that belong to other polls; failures are logged
    /// and dropped
    async fn release_all(&self, handles: &[DeliveryHandle]) {
        if !self.release_unmatched || handles.is_empty() {
            return;
        }
        let releases = handles.iter().map(|handle| self.client.release(handle));
        for (handle, result) in handles.iter().zip(futures::future::join_all(releases).await) {
            if let Err(e) = result {
                tracing::warn!(
                    broker_message_id = %handle.message_id,
                    error = %e,
                    "Failed to release unmatched result"
                );
            }
        }
    }
}
