//! Command dispatch: classify a delivery, run its action, reply.
//!
//! Every delivery on the service exchange produces exactly one reply, whether
//! the command could not be decoded, named an unknown or unimplemented action,
//! or ran and failed. Deliveries from any other exchange are not addressed to
//! this service and get no reply.

use shared_types::{ActionKind, CommandHeader, ReplyEnvelope};
use tracing::{info, warn};

use crate::actions::{self, ActionError, ListenSettings};
use crate::bus::{BusError, Delivery, SharedMessageBus};
use crate::config::Config;
use crate::rackhd::RackHdClient;
use crate::reply;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown exchange name: {0}")]
    UnknownExchange(String),

    #[error("failed to encode reply: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to send reply to {reply_to}: {source}")]
    Reply {
        reply_to: String,
        #[source]
        source: BusError,
    },
}

pub struct Dispatcher {
    bus: SharedMessageBus,
    rackhd: RackHdClient,
    exchange: String,
    exchange_type: String,
    listen: ListenSettings,
}

impl Dispatcher {
    pub fn new(bus: SharedMessageBus, rackhd: RackHdClient, config: &Config) -> Self {
        Self {
            bus,
            rackhd,
            exchange: config.exchange.clone(),
            exchange_type: config.exchange_type.clone(),
            listen: ListenSettings {
                consumer_tag: config.listen_consumer_tag.clone(),
                timeout: config.listen_timeout,
            },
        }
    }

    /// Handle one delivery end to end and publish its reply.
    pub async fn process_message(&self, delivery: &Delivery) -> Result<(), DispatchError> {
        if delivery.exchange != self.exchange {
            let err = DispatchError::UnknownExchange(delivery.exchange.clone());
            warn!(error = %err, "ignoring delivery");
            return Err(err);
        }

        info!(
            correlation_id = delivery.correlation_id.as_deref().unwrap_or_default(),
            bytes = delivery.body.len(),
            "command for RackHD service"
        );

        let reply = self.handle_command(delivery).await;
        reply::send_reply(self.bus.as_ref(), delivery, &self.exchange_type, &reply).await
    }

    /// Decode and run the command, folding every outcome into a reply.
    pub async fn handle_command(&self, delivery: &Delivery) -> ReplyEnvelope {
        let outcome = match classify(delivery) {
            Ok(action) => self.execute(action, delivery).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            warn!(
                correlation_id = delivery.correlation_id.as_deref().unwrap_or_default(),
                error = %e,
                "command failed"
            );
        }
        ReplyEnvelope::from_outcome(outcome)
    }

    async fn execute(&self, action: ActionKind, delivery: &Delivery) -> Result<String, ActionError> {
        match action {
            ActionKind::UploadTemplate => actions::upload_template(&self.rackhd, delivery).await,
            ActionKind::UploadWorkflow => actions::upload_workflow(&self.rackhd, delivery).await,
            ActionKind::RunWorkflow => actions::run_workflow(&self.rackhd, delivery).await,
            ActionKind::ListenWorkflow => {
                actions::listen_workflow(self.bus.as_ref(), delivery, &self.listen).await
            }
            ActionKind::DeleteTemplate => Err(ActionError::NotImplemented(action)),
        }
    }
}

/// Read the action discriminator from a command body.
pub fn classify(delivery: &Delivery) -> Result<ActionKind, ActionError> {
    let header: CommandHeader =
        serde_json::from_slice(&delivery.body).map_err(ActionError::InvalidEnvelope)?;
    ActionKind::from_wire(&header.action).ok_or(ActionError::UnknownAction(header.action))
}
