//! Broker abstraction: publish, consume with manual ack, nack with requeue.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BrokerError;

/// Stream of deliveries handed out by [`Broker::consume`].
pub type Deliveries = BoxStream<'static, Result<Delivery, BrokerError>>;

/// A message to publish. Always persistent JSON.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub message_id: String,
    pub body: Vec<u8>,
}

/// Durable, at-least-once queue.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publish to `queue`, returning only once the broker has taken the message.
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Start consuming `queue` with at most `prefetch` unacknowledged deliveries.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Deliveries, BrokerError>;

    /// Release connections. Deliveries already handed out may still be acked.
    async fn close(&self);
}

/// Settles one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A message handed to a consumer. It stays unacknowledged until settled.
pub struct Delivery {
    pub data: Vec<u8>,
    pub message_id: Option<String>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        data: Vec<u8>,
        message_id: Option<String>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            data,
            message_id,
            redelivered,
            acker,
        }
    }

    /// Message id for logging, `"unknown"` when the publisher set none.
    pub fn log_id(&self) -> &str {
        self.message_id.as_deref().unwrap_or("unknown")
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message_id)
            .field("redelivered", &self.redelivered)
            .field("body_length", &self.data.len())
            .finish()
    }
}
