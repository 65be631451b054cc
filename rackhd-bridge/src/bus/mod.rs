//! Message bus abstraction
//!
//! The bridge only needs two capabilities from the bus: open a subscription on
//! an exchange/routing key, and publish a message. Both are expressed by
//! [`MessageBus`] so the dispatcher can run against RabbitMQ ([`AmqpBus`]) or an
//! in-process bus ([`MemoryBus`]).
//!
//! Implementations must be safe for concurrent use: many in-flight request
//! handlers listen and send through the same bus at once.

mod amqp;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use amqp::AmqpBus;
pub use memory::MemoryBus;

pub type SharedMessageBus = Arc<dyn MessageBus>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("exchange {exchange} already declared as {declared}, requested {requested}")]
    ExchangeTypeMismatch {
        exchange: String,
        declared: String,
        requested: String,
    },
}

/// Where a subscription is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub exchange_type: String,
    pub routing_key: String,
}

impl Binding {
    pub fn new(
        exchange: impl Into<String>,
        exchange_type: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            exchange_type: exchange_type.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub exchange: String,
    pub exchange_type: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl Publish {
    pub fn new(
        exchange: impl Into<String>,
        exchange_type: impl Into<String>,
        routing_key: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            exchange_type: exchange_type.into(),
            routing_key: routing_key.into(),
            body: body.into(),
            correlation_id: None,
            reply_to: None,
        }
    }

    /// Set correlation ID (builder pattern)
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set reply-to address (builder pattern)
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Acknowledges one delivery back to the transport it came from.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), BusError>;
}

/// One message received from the bus.
#[derive(Clone)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    acker: Arc<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        delivery_tag: u64,
        body: Vec<u8>,
        acker: Arc<dyn Acknowledge>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            correlation_id: None,
            reply_to: None,
            delivery_tag,
            body,
            acker,
        }
    }

    pub fn with_correlation_id(mut self, id: Option<String>) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn with_reply_to(mut self, reply_to: Option<String>) -> Self {
        self.reply_to = reply_to;
        self
    }

    pub async fn ack(&self) -> Result<(), BusError> {
        self.acker.ack().await
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("correlation_id", &self.correlation_id)
            .field("reply_to", &self.reply_to)
            .field("delivery_tag", &self.delivery_tag)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Deliveries from one bound queue, in bus order.
///
/// Dropping the subscription tears down the consumer and its queue binding.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, deliveries: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            queue: queue.into(),
            deliveries,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Next delivery, or `None` once the transport has stopped.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Declare `binding.exchange`, bind `queue` to it with `binding.routing_key`
    /// and start consuming.
    async fn listen(
        &self,
        binding: &Binding,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Subscription, BusError>;

    /// Declare `publish.exchange` and publish the message on it.
    async fn send(&self, publish: Publish) -> Result<(), BusError>;
}

/// Collision-resistant queue name.
pub fn random_queue_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_queue_names_are_unique() {
        let a = random_queue_name("rackhd");
        let b = random_queue_name("rackhd");
        assert_ne!(a, b);
        assert!(a.starts_with("rackhd-"));
    }

    #[test]
    fn test_publish_builder() {
        let publish = Publish::new("ex", "topic", "key", "body")
            .with_correlation_id("c1")
            .with_reply_to("Replies");
        assert_eq!(publish.body, b"body".to_vec());
        assert_eq!(publish.correlation_id.as_deref(), Some("c1"));
        assert_eq!(publish.reply_to.as_deref(), Some("Replies"));
    }
}
