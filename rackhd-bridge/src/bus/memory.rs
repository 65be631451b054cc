//! In-process bus with AMQP routing semantics.
//!
//! Exchanges are typed on first declaration. Queues are bound with a routing
//! key pattern; `topic` exchanges match dot-separated words where `*` is
//! exactly one word and `#` is zero or more, `fanout` exchanges match every
//! key, any other type matches the key exactly. Messages nobody is bound for
//! are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Acknowledge, Binding, BusError, Delivery, MessageBus, Publish, Subscription};

struct QueueBinding {
    exchange: String,
    pattern: String,
    queue: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct MemoryState {
    exchanges: HashMap<String, String>,
    bindings: Vec<QueueBinding>,
    published: Vec<Publish>,
    next_tag: u64,
}

#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<MemoryState>>,
    acked: Arc<AtomicU64>,
}

struct MemoryAck {
    acked: Arc<AtomicU64>,
}

#[async_trait]
impl Acknowledge for MemoryAck {
    async fn ack(&self) -> Result<(), BusError> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every message sent so far, in send order.
    pub fn published(&self) -> Vec<Publish> {
        self.lock().published.clone()
    }

    /// Number of deliveries acknowledged by consumers.
    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    /// Whether a live subscription is bound to `exchange` with exactly `routing_key`.
    pub fn is_bound(&self, exchange: &str, routing_key: &str) -> bool {
        self.lock().bindings.iter().any(|b| {
            b.exchange == exchange && b.pattern == routing_key && !b.sender.is_closed()
        })
    }

    fn declare_exchange(
        state: &mut MemoryState,
        exchange: &str,
        exchange_type: &str,
    ) -> Result<(), BusError> {
        match state.exchanges.get(exchange) {
            Some(declared) if declared != exchange_type => Err(BusError::ExchangeTypeMismatch {
                exchange: exchange.to_string(),
                declared: declared.clone(),
                requested: exchange_type.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                state
                    .exchanges
                    .insert(exchange.to_string(), exchange_type.to_string());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn listen(
        &self,
        binding: &Binding,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<Subscription, BusError> {
        let mut state = self.lock();
        Self::declare_exchange(&mut state, &binding.exchange, &binding.exchange_type)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        state.bindings.push(QueueBinding {
            exchange: binding.exchange.clone(),
            pattern: binding.routing_key.clone(),
            queue: queue.to_string(),
            sender,
        });
        tracing::debug!(
            exchange = %binding.exchange,
            routing_key = %binding.routing_key,
            queue,
            "memory bus queue bound"
        );
        Ok(Subscription::new(queue, receiver))
    }

    async fn send(&self, publish: Publish) -> Result<(), BusError> {
        let mut state = self.lock();
        Self::declare_exchange(&mut state, &publish.exchange, &publish.exchange_type)?;

        // Subscriptions that were dropped are unbound here.
        state.bindings.retain(|b| !b.sender.is_closed());

        let targets: Vec<mpsc::UnboundedSender<Delivery>> = state
            .bindings
            .iter()
            .filter(|b| {
                b.exchange == publish.exchange
                    && routing_key_matches(&publish.exchange_type, &b.pattern, &publish.routing_key)
            })
            .map(|b| b.sender.clone())
            .collect();

        if targets.is_empty() {
            tracing::debug!(
                exchange = %publish.exchange,
                routing_key = %publish.routing_key,
                "memory bus message unroutable; dropped"
            );
        }

        for target in targets {
            state.next_tag += 1;
            let delivery = Delivery::new(
                publish.exchange.clone(),
                publish.routing_key.clone(),
                state.next_tag,
                publish.body.clone(),
                Arc::new(MemoryAck {
                    acked: Arc::clone(&self.acked),
                }),
            )
            .with_correlation_id(publish.correlation_id.clone())
            .with_reply_to(publish.reply_to.clone());
            // A receiver dropped between retain and here just loses the message.
            let _ = target.send(delivery);
        }

        state.published.push(publish);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryBus")
            .field("exchanges", &state.exchanges)
            .field(
                "queues",
                &state.bindings.iter().map(|b| &b.queue).collect::<Vec<_>>(),
            )
            .field("published", &state.published.len())
            .finish()
    }
}

/// AMQP routing rule for `exchange_type`.
pub(crate) fn routing_key_matches(exchange_type: &str, pattern: &str, routing_key: &str) -> bool {
    match exchange_type {
        "fanout" => true,
        "topic" => {
            let pattern: Vec<&str> = pattern.split('.').collect();
            let key: Vec<&str> = routing_key.split('.').collect();
            topic_matches(&pattern, &key)
        }
        _ => pattern == routing_key,
    }
}

fn topic_matches(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            topic_matches(rest, key)
                || key
                    .split_first()
                    .is_some_and(|(_, key_rest)| topic_matches(pattern, key_rest))
        }
        (Some((&"*", rest)), Some((_, key_rest))) => topic_matches(rest, key_rest),
        (Some((word, rest)), Some((key_word, key_rest))) => {
            word == key_word && topic_matches(rest, key_rest)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matching() {
        assert!(routing_key_matches("topic", "graph.finished.abc", "graph.finished.abc"));
        assert!(routing_key_matches("topic", "graph.finished.*", "graph.finished.abc"));
        assert!(!routing_key_matches("topic", "graph.finished.*", "graph.finished"));
        assert!(!routing_key_matches("topic", "graph.*", "graph.finished.abc"));
        assert!(routing_key_matches("topic", "graph.#", "graph.finished.abc"));
        assert!(routing_key_matches("topic", "graph.#", "graph"));
        assert!(routing_key_matches("topic", "#", "anything.at.all"));
        assert!(routing_key_matches("topic", "#.abc", "graph.finished.abc"));
        assert!(!routing_key_matches("topic", "requests", "Replies"));
    }

    #[test]
    fn test_direct_and_fanout_matching() {
        assert!(routing_key_matches("direct", "a.b", "a.b"));
        assert!(!routing_key_matches("direct", "a.*", "a.b"));
        assert!(routing_key_matches("fanout", "ignored", "whatever"));
    }

    #[tokio::test]
    async fn test_send_routes_to_bound_queue_with_metadata() {
        let bus = MemoryBus::new();
        let mut sub = bus
            .listen(&Binding::new("ex", "topic", "requests"), "q1", "")
            .await
            .unwrap();

        bus.send(
            Publish::new("ex", "topic", "requests", "hello")
                .with_correlation_id("corr-1")
                .with_reply_to("Replies"),
        )
        .await
        .unwrap();
        bus.send(Publish::new("ex", "topic", "other", "ignored"))
            .await
            .unwrap();

        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.exchange, "ex");
        assert_eq!(delivery.routing_key, "requests");
        assert_eq!(delivery.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(delivery.reply_to.as_deref(), Some("Replies"));
        assert_eq!(delivery.body_text(), "hello");

        delivery.ack().await.unwrap();
        assert_eq!(bus.acked_count(), 1);
        assert_eq!(bus.published().len(), 2);
        assert_eq!(sub.queue(), "q1");
    }

    #[tokio::test]
    async fn test_exchange_type_mismatch_is_rejected() {
        let bus = MemoryBus::new();
        bus.send(Publish::new("ex", "topic", "k", "x")).await.unwrap();
        let err = bus
            .listen(&Binding::new("ex", "direct", "k"), "q", "")
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ExchangeTypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_unbound() {
        let bus = MemoryBus::new();
        let sub = bus
            .listen(&Binding::new("ex", "topic", "k"), "q", "")
            .await
            .unwrap();
        assert!(bus.is_bound("ex", "k"));
        drop(sub);
        assert!(!bus.is_bound("ex", "k"));
        bus.send(Publish::new("ex", "topic", "k", "x")).await.unwrap();
        assert!(!bus.is_bound("ex", "k"));
    }
}
