//! In-process broker with peek-lock delivery
//!
//! Backs the correlator and API test suites. Queues are FIFO; a received message
//! is locked for `visibility_timeout` and becomes deliverable again when the
//! lock expires or is released. Only the holder of the current lock token can
//! acknowledge it.

use super::{Delivery, DeliveryHandle, QueueReceiver, QueueSender};
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Lock {
    token: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: Bytes,
    delivery_count: u32,
    lock: Option<Lock>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.lock.as_ref().is_none_or(|lock| lock.expires_at <= now)
    }

    fn holds(&self, token: &str, now: Instant) -> bool {
        self.lock
            .as_ref()
            .is_some_and(|lock| lock.token == token && lock.expires_at > now)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    next_sequence: u64,
}

impl BrokerState {
    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }
}

/// Shared in-memory broker holding any number of named queues
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    visibility_timeout: Duration,
}

impl MemoryBroker {
    /// Create a broker whose deliveries stay locked for `visibility_timeout`
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            visibility_timeout,
        }
    }

    /// A publishing connection to `queue`
    pub fn sender(&self, queue: impl Into<String>) -> MemorySender {
        MemorySender {
            broker: self.clone(),
            queue: queue.into(),
            closed: AtomicBool::new(false),
        }
    }

    /// A receiving connection to `queue`
    pub fn receiver(&self, queue: impl Into<String>) -> MemoryReceiver {
        MemoryReceiver {
            broker: self.clone(),
            queue: queue.into(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of messages stored in `queue`, locked or not
    pub async fn depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Bodies currently stored in `queue`, in delivery order
    pub async fn bodies(&self, queue: &str) -> Vec<Bytes> {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    async fn enqueue(&self, queue: &str, body: Bytes) {
        let mut state = self.state.lock().await;
        let sequence = state.next_sequence();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                id: format!("mem-{sequence}"),
                body,
                delivery_count: 0,
                lock: None,
            });
    }

    async fn lock_batch(&self, queue: &str, max_count: usize) -> Vec<Delivery> {
        let mut state = self.state.lock().await;
        let BrokerState {
            queues,
            next_sequence,
        } = &mut *state;
        let Some(messages) = queues.get_mut(queue) else {
            return Vec::new();
        };

        let now = Instant::now();
        let expires_at = now + self.visibility_timeout;
        let mut batch = Vec::new();
        for message in messages
            .iter_mut()
            .filter(|m| m.is_visible(now))
            .take(max_count)
        {
            *next_sequence += 1;
            let token = format!("lock-{next_sequence}");
            message.delivery_count += 1;
            message.lock = Some(Lock {
                token: token.clone(),
                expires_at,
            });
            batch.push(Delivery {
                body: message.body.clone(),
                handle: DeliveryHandle {
                    message_id: message.id.clone(),
                    lock_token: token,
                },
                delivery_count: message.delivery_count,
            });
        }
        batch
    }

    async fn complete(&self, queue: &str, handle: &DeliveryHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let position = state.queues.get(queue).and_then(|messages| {
            messages
                .iter()
                .position(|m| m.id == handle.message_id && m.holds(&handle.lock_token, now))
        });

        match (position, state.queues.get_mut(queue)) {
            (Some(index), Some(messages)) => {
                messages.remove(index);
                Ok(())
            }
            _ => Err(TransportError::LockLost {
                message_id: handle.message_id.clone(),
            }
            .into()),
        }
    }

    async fn unlock(&self, queue: &str, handle: &DeliveryHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let message = state.queues.get_mut(queue).and_then(|messages| {
            messages
                .iter_mut()
                .find(|m| m.id == handle.message_id && m.holds(&handle.lock_token, now))
        });

        match message {
            Some(message) => {
                message.lock = None;
                Ok(())
            }
            None => Err(TransportError::LockLost {
                message_id: handle.message_id.clone(),
            }
            .into()),
        }
    }
}

/// Publishing connection to one in-memory queue
pub struct MemorySender {
    broker: MemoryBroker,
    queue: String,
    closed: AtomicBool,
}

#[async_trait]
impl QueueSender for MemorySender {
    async fn send(&self, body: Bytes) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        self.broker.enqueue(&self.queue, body).await;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Receiving connection to one in-memory queue
pub struct MemoryReceiver {
    broker: MemoryBroker,
    queue: String,
    closed: AtomicBool,
}

impl MemoryReceiver {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl QueueReceiver for MemoryReceiver {
    async fn receive_batch(&self, max_count: usize) -> Result<Vec<Delivery>> {
        self.ensure_open()?;
        Ok(self.broker.lock_batch(&self.queue, max_count).await)
    }

    async fn acknowledge(&self, handle: &DeliveryHandle) -> Result<()> {
        self.ensure_open()?;
        self.broker.complete(&self.queue, handle).await
    }

    async fn release(&self, handle: &DeliveryHandle) -> Result<()> {
        self.ensure_open()?;
        self.broker.unlock(&self.queue, handle).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
