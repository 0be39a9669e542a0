//! Azure Service Bus adapter over the HTTP REST protocol
//!
//! Receives use peek-lock: `POST {queue}/messages/head` locks the head message
//! and returns it with a `BrokerProperties` header, `DELETE` on
//! `{queue}/messages/{id}/{lock}` completes it and `PUT` on the same path
//! unlocks it. Every request carries a freshly minted SAS token.

use super::{Delivery, DeliveryHandle, QueueReceiver, QueueSender};
use crate::config::QueueConfig;
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

mod connection;

pub use connection::ConnectionString;


const BROKER_PROPERTIES: &str = "BrokerProperties";

/// Subset of the `BrokerProperties` header the gateway reads
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties {
    message_id: String,
    lock_token: String,
    #[serde(default)]
    delivery_count: u32,
    #[serde(default)]
    sequence_number: Option<u64>,
}

/// One authenticated HTTP connection to a queue entity
struct EntityConnection {
    http: reqwest::Client,
    connection: ConnectionString,
    entity_url: String,
    permits: Semaphore,
    closed: AtomicBool,
}

impl EntityConnection {
    fn open(config: &QueueConfig, queue: &str) -> Result<Self> {
        let connection = ConnectionString::parse(&config.connection_string)?;
        let http = reqwest::Client::builder()
            .timeout(config.operation_timeout)
            .build()
            .map_err(TransportError::Connection)?;

        Ok(Self {
            entity_url: connection.entity_url(queue),
            http,
            connection,
            permits: Semaphore::new(config.max_concurrent_calls),
            closed: AtomicBool::new(false),
        })
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        self.permits
            .acquire()
            .await
            .map_err(|_| TransportError::Closed.into())
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self
            .connection
            .authorization(&self.entity_url, chrono::Utc::now())?;
        Ok(self
            .http
            .request(method, url)
            .header(header::AUTHORIZATION, token))
    }

    fn lock_url(&self, handle: &DeliveryHandle) -> String {
        format!(
            "{}/messages/{}/{}",
            self.entity_url,
            urlencoding::encode(&handle.message_id),
            urlencoding::encode(&handle.lock_token)
        )
    }

    /// Issue a complete or unlock request against a locked message
    async fn settle(&self, method: Method, handle: &DeliveryHandle) -> Result<()> {
        let _permit = self.permit().await?;
        let response = self
            .request(method, &self.lock_url(handle))?
            .send()
            .await
            .map_err(TransportError::Connection)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(TransportError::LockLost {
                message_id: handle.message_id.clone(),
            }
            .into()),
            _ => Err(broker_error(response).await.into()),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.permits.close();
            tracing::debug!(entity = %self.entity_url, "Service Bus connection closed");
        }
    }
}

async fn broker_error(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::Broker { status, body }
}

/// Publishing connection to a Service Bus queue
pub struct ServiceBusSender {
    inner: EntityConnection,
}

impl ServiceBusSender {
    /// Open a sender for the configured publish queue
    pub fn connect(config: &QueueConfig) -> Result<Self> {
        let inner = EntityConnection::open(config, &config.publish_queue)?;
        tracing::info!(entity = %inner.entity_url, "Service Bus sender ready");
        Ok(Self { inner })
    }
}

#[async_trait]
impl QueueSender for ServiceBusSender {
    async fn send(&self, body: Bytes) -> Result<()> {
        let _permit = self.inner.permit().await?;
        let url = format!("{}/messages", self.inner.entity_url);
        let response = self
            .inner
            .request(Method::POST, &url)?
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(TransportError::Connection)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(broker_error(response).await.into())
        }
    }

    async fn close(&self) {
        self.inner.close();
    }
}

/// Peek-lock receiving connection to a Service Bus queue
pub struct ServiceBusReceiver {
    inner: EntityConnection,
    receive_wait: Duration,
    batch_deadline: Duration,
}

impl ServiceBusReceiver {
    /// Open a receiver for the configured receive queue
    pub fn connect(config: &QueueConfig) -> Result<Self> {
        let inner = EntityConnection::open(config, &config.receive_queue)?;
        tracing::info!(entity = %inner.entity_url, "Service Bus receiver ready");
        Ok(Self {
            inner,
            receive_wait: config.receive_wait,
            batch_deadline: config.operation_timeout,
        })
    }

    /// Lock the head message, waiting up to `wait_secs` server-side
    async fn receive_one(&self, wait_secs: u64) -> Result<Option<Delivery>> {
        let _permit = self.inner.permit().await?;
        let url = format!(
            "{}/messages/head?timeout={wait_secs}",
            self.inner.entity_url
        );
        let response = self
            .inner
            .request(Method::POST, &url)?
            .body(Vec::<u8>::new())
            .send()
            .await
            .map_err(TransportError::Connection)?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::OK | StatusCode::CREATED => {
                let status = response.status().as_u16();
                let properties = response
                    .headers()
                    .get(BROKER_PROPERTIES)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| serde_json::from_str::<BrokerProperties>(value).ok())
                    .ok_or_else(|| TransportError::Broker {
                        status,
                        body: "missing or unreadable BrokerProperties header".to_string(),
                    })?;
                let body = response.bytes().await.map_err(TransportError::Connection)?;

                tracing::trace!(
                    message_id = %properties.message_id,
                    sequence_number = ?properties.sequence_number,
                    delivery_count = properties.delivery_count,
                    "Locked message"
                );
                Ok(Some(Delivery {
                    body,
                    handle: DeliveryHandle {
                        message_id: properties.message_id,
                        lock_token: properties.lock_token,
                    },
                    delivery_count: properties.delivery_count,
                }))
            }
            _ => Err(broker_error(response).await.into()),
        }
    }
}

#[async_trait]
impl QueueReceiver for ServiceBusReceiver {
    /// Stops at `operation_timeout`; whatever was locked by then is returned
    /// so the caller can still settle it.
    async fn receive_batch(&self, max_count: usize) -> Result<Vec<Delivery>> {
        let deadline = tokio::time::Instant::now() + self.batch_deadline;
        let mut batch = Vec::new();
        while batch.len() < max_count {
            // Only the first call waits; the rest drain what is already there.
            let wait_secs = if batch.is_empty() {
                self.receive_wait.as_secs()
            } else {
                0
            };
            let received = tokio::time::timeout_at(deadline, self.receive_one(wait_secs))
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::Timeout {
                        operation: "receive",
                        after: self.batch_deadline,
                    }
                    .into())
                });
            match received {
                Ok(Some(delivery)) => batch.push(delivery),
                Ok(None) => break,
                Err(e) if batch.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        received = batch.len(),
                        "Receive failed mid-batch, returning partial batch"
                    );
                    break;
                }
            }
        }
        Ok(batch)
    }

    async fn acknowledge(&self, handle: &DeliveryHandle) -> Result<()> {
        self.inner.settle(Method::DELETE, handle).await
    }

    async fn release(&self, handle: &DeliveryHandle) -> Result<()> {
        self.inner.settle(Method::PUT, handle).await
    }

    async fn close(&self) {
        self.inner.close();
    }
}
