//! Broker-agnostic queue transport
//!
//! Two narrow capabilities, [`QueueSender`] and [`QueueReceiver`], describe
//! everything the correlator needs from a broker. [`QueueClient`] owns one
//! connection of each kind for the lifetime of the process, puts a deadline
//! on every call, and refuses further work once closed.
//!
//! Adapters:
//! - [`service_bus`] - Azure Service Bus over its HTTP REST protocol
//! - [`memory`] - in-process broker with peek-lock semantics

use crate::error::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub mod memory;
pub mod service_bus;

pub use memory::MemoryBroker;
pub use service_bus::{ConnectionString, ServiceBusReceiver, ServiceBusSender};

/// Extra time a receive gets past `operation_timeout` to return its partial batch
pub const RECEIVE_GRACE: Duration = Duration::from_millis(500);

/// Opaque broker reference to one delivery, used to acknowledge or release it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHandle {
    /// Broker-assigned message id
    pub message_id: String,
    /// Lock token of this particular delivery
    pub lock_token: String,
}

/// One message returned by a batch receive
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Raw message body
    pub body: Bytes,
    /// Handle for acknowledging or releasing this delivery
    pub handle: DeliveryHandle,
    /// How many times the broker has handed out this message, this delivery included
    pub delivery_count: u32,
}

/// Publish side of a broker connection
///
/// Delivery is at-least-once; implementations do not deduplicate.
#[async_trait]
pub trait QueueSender: Send + Sync {
    /// Publish one raw message body
    async fn send(&self, body: Bytes) -> Result<()>;

    /// Close the connection. Idempotent; failures are logged, never returned.
    async fn close(&self);
}

/// Receive side of a broker connection
///
/// Received messages stay locked until acknowledged, released, or until the
/// broker's visibility timeout expires, after which they are redelivered.
#[async_trait]
pub trait QueueReceiver: Send + Sync {
    /// Receive up to `max_count` messages in broker delivery order
    async fn receive_batch(&self, max_count: usize) -> Result<Vec<Delivery>>;

    /// Mark a delivery as consumed so it is never redelivered
    async fn acknowledge(&self, handle: &DeliveryHandle) -> Result<()>;

    /// Give up the lock on a delivery without consuming it
    ///
    /// The default leaves the lock to expire on its own.
    async fn release(&self, _handle: &DeliveryHandle) -> Result<()> {
        Ok(())
    }

    /// Close the connection. Idempotent; failures are logged, never returned.
    async fn close(&self);
}

/// The gateway's pair of long-lived broker connections
///
/// Cheap to clone; all clones share the same connections and closed state.
#[derive(Clone)]
pub struct QueueClient {
    sender: Arc<dyn QueueSender>,
    receiver: Arc<dyn QueueReceiver>,
    operation_timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl QueueClient {
    /// Wrap a sender and receiver; every call is bounded by `operation_timeout`
    pub fn new(
        sender: Arc<dyn QueueSender>,
        receiver: Arc<dyn QueueReceiver>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            sender,
            receiver,
            operation_timeout,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish a message body on the outbound connection
    pub async fn send(&self, body: Bytes) -> Result<()> {
        self.bounded("send", self.sender.send(body)).await
    }

    /// Receive a batch from the inbound connection
    ///
    /// Receivers that lock messages one at a time stop on their own at
    /// `operation_timeout` and hand back the partial batch. The client
    /// deadline here is [`RECEIVE_GRACE`] later and only catches receivers
    /// that never return.
    pub async fn receive_batch(&self, max_count: usize) -> Result<Vec<Delivery>> {
        self.bounded_for(
            "receive",
            self.operation_timeout + RECEIVE_GRACE,
            self.receiver.receive_batch(max_count),
        )
        .await
    }

    /// Acknowledge a delivery on the inbound connection
    pub async fn acknowledge(&self, handle: &DeliveryHandle) -> Result<()> {
        self.bounded("acknowledge", self.receiver.acknowledge(handle))
            .await
    }

    /// Release a delivery on the inbound connection
    pub async fn release(&self, handle: &DeliveryHandle) -> Result<()> {
        self.bounded("release", self.receiver.release(handle)).await
    }

    /// Whether [`QueueClient::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close both connections exactly once
    ///
    /// Later calls are no-ops, and every send/receive after the first call
    /// fails with [`TransportError::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Closing queue connections");
        futures::join!(self.sender.close(), self.receiver.close());
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.bounded_for(operation, self.operation_timeout, call)
            .await
    }

    async fn bounded_for<T>(
        &self,
        operation: &'static str,
        limit: Duration,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = limit.as_millis() as u64,
                    "Queue operation timed out"
                );
                Err(TransportError::Timeout {
                    operation,
                    after: limit,
                }
                .into())
            }
        }
    }
}
