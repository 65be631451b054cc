//! Listen Workflow: surface one future bus event as the reply.
//!
//! The handler binds a fresh queue to the requested exchange/routing key and
//! waits for exactly one delivery. Without a configured timeout the wait is
//! unbounded; the task handling the request stays parked until the event is
//! published. The subscription is dropped once the event is acknowledged.

use std::time::Duration;

use shared_types::{ActionKind, ListenWorkflowRequest};
use tracing::{info, warn};

use super::{decode_payload, ActionError};
use crate::bus::{random_queue_name, Binding, Delivery, MessageBus};

const LISTEN_QUEUE_PREFIX: &str = "rackhd-listen";

#[derive(Debug, Clone)]
pub struct ListenSettings {
    pub consumer_tag: String,
    pub timeout: Option<Duration>,
}

pub async fn listen_workflow(
    bus: &dyn MessageBus,
    delivery: &Delivery,
    settings: &ListenSettings,
) -> Result<String, ActionError> {
    let request: ListenWorkflowRequest = decode_payload(ActionKind::ListenWorkflow, delivery)?;
    let binding = Binding::new(
        request.exchange.clone(),
        request.exchange_type.clone(),
        request.routing_key.clone(),
    );
    let queue = random_queue_name(LISTEN_QUEUE_PREFIX);

    let mut subscription = bus
        .listen(&binding, &queue, &settings.consumer_tag)
        .await
        .map_err(|source| ActionError::Listen {
            exchange: request.exchange.clone(),
            routing_key: request.routing_key.clone(),
            source,
        })?;

    info!(
        exchange = %request.exchange,
        routing_key = %request.routing_key,
        queue = %queue,
        "waiting for workflow event"
    );

    let next = match settings.timeout {
        Some(timeout) => tokio::time::timeout(timeout, subscription.next())
            .await
            .map_err(|_| ActionError::ListenTimeout {
                exchange: request.exchange.clone(),
                routing_key: request.routing_key.clone(),
                timeout,
            })?,
        None => subscription.next().await,
    };

    let event = next.ok_or_else(|| ActionError::SubscriptionClosed {
        exchange: request.exchange.clone(),
        routing_key: request.routing_key.clone(),
    })?;

    // Ack while the subscription channel is still open.
    if let Err(e) = event.ack().await {
        warn!(queue = %queue, error = %e, "failed to acknowledge workflow event");
    }
    drop(subscription);

    info!(
        exchange = %request.exchange,
        routing_key = %request.routing_key,
        bytes = event.body.len(),
        "received workflow event"
    );
    Ok(event.body_text())
}
