//! Wire contract for the RackHD bridge
//!
//! These types are used by both:
//! - the bridge service (decoding commands, encoding replies)
//! - bus clients that drive RackHD through the bridge
//!
//! Every body on the bus is JSON with camelCase keys.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ============================================================================
// Actions
// ============================================================================

/// Discriminator carried in the `action` field of every command.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum ActionKind {
    #[serde(rename = "UploadTemplateAction")]
    #[strum(serialize = "UploadTemplateAction")]
    UploadTemplate,

    #[serde(rename = "UploadWorkflowAction")]
    #[strum(serialize = "UploadWorkflowAction")]
    UploadWorkflow,

    #[serde(rename = "RunWorkflowAction")]
    #[strum(serialize = "RunWorkflowAction")]
    RunWorkflow,

    #[serde(rename = "ListenWorkflowAction")]
    #[strum(serialize = "ListenWorkflowAction")]
    ListenWorkflow,

    /// Recognized on the wire, not implemented by the bridge.
    #[serde(rename = "DeleteTemplateAction")]
    #[strum(serialize = "DeleteTemplateAction")]
    DeleteTemplate,
}

impl ActionKind {
    /// Parse the wire name of an action. Matching is exact and case sensitive.
    pub fn from_wire(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

/// The part of a command every action shares.
///
/// A missing `action` decodes as the empty string so that it is reported as an
/// unknown action rather than a malformed envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandHeader {
    #[serde(default)]
    pub action: String,
}

// ============================================================================
// Command payloads
// ============================================================================

/// Upload a config template to the RackHD template library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTemplateRequest {
    pub action: ActionKind,
    pub name: String,
    pub config: String,
}

impl UploadTemplateRequest {
    pub fn new(name: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            action: ActionKind::UploadTemplate,
            name: name.into(),
            config: config.into(),
        }
    }
}

/// Upload a workflow (graph) definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadWorkflowRequest {
    pub action: ActionKind,
    pub workflow: String,
}

impl UploadWorkflowRequest {
    pub fn new(workflow: impl Into<String>) -> Self {
        Self {
            action: ActionKind::UploadWorkflow,
            workflow: workflow.into(),
        }
    }
}

/// Run a workflow against a node.
///
/// Only `nodeId` is interpreted by the bridge. The whole original command body
/// is forwarded to RackHD, so every other field reaches it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunWorkflowRequest {
    pub action: ActionKind,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RunWorkflowRequest {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            action: ActionKind::RunWorkflow,
            node_id: node_id.into(),
            name: None,
            options: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set the graph name (builder pattern)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set graph options (builder pattern)
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// Wait for one event on an exchange/routing key and return it as the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenWorkflowRequest {
    pub action: ActionKind,
    pub exchange: String,
    pub exchange_type: String,
    pub routing_key: String,
}

impl ListenWorkflowRequest {
    pub fn new(
        exchange: impl Into<String>,
        exchange_type: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            action: ActionKind::ListenWorkflow,
            exchange: exchange.into(),
            exchange_type: exchange_type.into(),
            routing_key: routing_key.into(),
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

const UNSPECIFIED_FAILURE: &str = "action failed";

/// One reply is published for every command the bridge accepts.
///
/// `failed` is true exactly when `error` is non-empty. `server_response` is the
/// raw payload produced by the action (RackHD response body or event body).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplyEnvelope {
    pub failed: bool,
    pub error: String,
    pub server_response: String,
}

impl ReplyEnvelope {
    pub fn success(server_response: impl Into<String>) -> Self {
        Self {
            failed: false,
            error: String::new(),
            server_response: server_response.into(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = UNSPECIFIED_FAILURE.to_string();
        }
        Self {
            failed: true,
            error,
            server_response: String::new(),
        }
    }

    /// Fold an action outcome into a reply.
    pub fn from_outcome<E: std::fmt::Display>(outcome: Result<String, E>) -> Self {
        match outcome {
            Ok(server_response) => Self::success(server_response),
            Err(e) => Self::failure(e.to_string()),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.failed != self.error.is_empty()
    }
}

// ============================================================================
// Well-known RackHD bus names
// ============================================================================

pub const RACKHD_EVENTS_EXCHANGE: &str = "on.events";
pub const RACKHD_EVENTS_EXCHANGE_TYPE: &str = "topic";
pub const GRAPH_FINISHED_ROUTING_KEY: &str = "graph.finished";

/// Routing key RackHD uses when the graph with `graph_id` finishes.
pub fn graph_finished_routing_key(graph_id: &str) -> String {
    format!("{GRAPH_FINISHED_ROUTING_KEY}.{graph_id}")
}

// ============================================================================
// Tests
// ============================================================================
