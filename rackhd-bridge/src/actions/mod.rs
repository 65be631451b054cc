//! Action executors.
//!
//! Each executor decodes its own payload from the delivery body, performs one
//! side effect and returns the raw response text for the reply.

mod listen;

use shared_types::{ActionKind, RunWorkflowRequest, UploadTemplateRequest, UploadWorkflowRequest};
use tracing::info;

use crate::bus::{BusError, Delivery};
use crate::rackhd::{RackHdClient, RackHdError};

pub use listen::{listen_workflow, ListenSettings};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid command envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    #[error("unknown action: {0:?}")]
    UnknownAction(String),

    #[error("{0} is not implemented")]
    NotImplemented(ActionKind),

    #[error("invalid {action} payload: {source}")]
    InvalidPayload {
        action: ActionKind,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    RackHd(#[from] RackHdError),

    #[error("failed to listen on {exchange} with routing key {routing_key}: {source}")]
    Listen {
        exchange: String,
        routing_key: String,
        #[source]
        source: BusError,
    },

    #[error("subscription on {exchange} with routing key {routing_key} closed before an event arrived")]
    SubscriptionClosed {
        exchange: String,
        routing_key: String,
    },

    #[error("no event on {exchange} with routing key {routing_key} within {timeout:?}")]
    ListenTimeout {
        exchange: String,
        routing_key: String,
        timeout: std::time::Duration,
    },
}

pub(crate) fn decode_payload<T: serde::de::DeserializeOwned>(
    action: ActionKind,
    delivery: &Delivery,
) -> Result<T, ActionError> {
    serde_json::from_slice(&delivery.body)
        .map_err(|source| ActionError::InvalidPayload { action, source })
}

/// Upload the template named in the payload.
pub async fn upload_template(
    rackhd: &RackHdClient,
    delivery: &Delivery,
) -> Result<String, ActionError> {
    let request: UploadTemplateRequest = decode_payload(ActionKind::UploadTemplate, delivery)?;
    let response = rackhd
        .upload_template(&request.name, &request.config)
        .await?;
    info!(template = %request.name, "uploaded config template");
    Ok(response)
}

pub async fn upload_workflow(
    rackhd: &RackHdClient,
    delivery: &Delivery,
) -> Result<String, ActionError> {
    let request: UploadWorkflowRequest = decode_payload(ActionKind::UploadWorkflow, delivery)?;
    let response = rackhd.upload_workflow(&request.workflow).await?;
    info!(url = %rackhd.workflows_url(), "uploaded workflow");
    Ok(response)
}

/// Run the injectable workflow on the node in the payload.
///
/// RackHD receives the whole original command body, not a re-encoded copy.
pub async fn run_workflow(
    rackhd: &RackHdClient,
    delivery: &Delivery,
) -> Result<String, ActionError> {
    let request: RunWorkflowRequest = decode_payload(ActionKind::RunWorkflow, delivery)?;
    let response = rackhd
        .run_workflow(&request.node_id, delivery.body.clone())
        .await?;
    info!(node_id = %request.node_id, "ran workflow");
    Ok(response)
}
