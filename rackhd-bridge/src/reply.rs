//! Reply correlation: publish a reply where the requester is listening.
//!
//! The reply goes to the exchange the command arrived on, routed by the
//! command's `reply_to`, and carries the command's correlation id verbatim.

use shared_types::ReplyEnvelope;
use tracing::debug;

use crate::bus::{Delivery, MessageBus, Publish};
use crate::dispatcher::DispatchError;

pub async fn send_reply(
    bus: &dyn MessageBus,
    delivery: &Delivery,
    exchange_type: &str,
    reply: &ReplyEnvelope,
) -> Result<(), DispatchError> {
    let body = serde_json::to_vec(reply).map_err(DispatchError::Encode)?;
    let reply_to = delivery.reply_to.clone().unwrap_or_default();

    let mut publish = Publish::new(
        delivery.exchange.clone(),
        exchange_type,
        reply_to.clone(),
        body,
    );
    publish.correlation_id = delivery.correlation_id.clone();

    bus.send(publish)
        .await
        .map_err(|source| DispatchError::Reply {
            reply_to: reply_to.clone(),
            source,
        })?;

    debug!(
        reply_to = %reply_to,
        correlation_id = delivery.correlation_id.as_deref().unwrap_or_default(),
        failed = reply.failed,
        "sent reply"
    );
    Ok(())
}
