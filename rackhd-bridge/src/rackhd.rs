//! HTTP client for the RackHD 1.1 API.
//!
//! Every call expects `201 Created`. Anything else, including other 2xx codes,
//! is reported as [`RackHdError::UnexpectedStatus`]. Calls are never retried
//! here; retry policy belongs to whoever sent the command on the bus.
//!
//! Identifiers taken from commands (template names, node ids) always land in
//! exactly one percent-encoded path segment.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use tracing::debug;

const API_ROOT: [&str; 2] = ["api", "1.1"];

const TEXT_PLAIN: &str = "text/plain";
const APPLICATION_JSON: &str = "application/json";

#[derive(Debug, thiserror::Error)]
pub enum RackHdError {
    #[error("error building HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid RackHD address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid {what} {value:?}")]
    InvalidIdentifier { what: &'static str, value: String },

    #[error("error making request to api server {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed with status: {status}\nresponse: {body}")]
    UnexpectedStatus {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("error reading response from api server {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone)]
pub struct RackHdClient {
    base_url: Url,
    injectable_workflow: String,
    client: reqwest::Client,
}

impl RackHdClient {
    pub fn new(
        base_url: impl Into<String>,
        injectable_workflow: impl Into<String>,
    ) -> Result<Self, RackHdError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(RackHdError::Client)?;
        Self::with_client(base_url, injectable_workflow, client)
    }

    pub fn with_client(
        base_url: impl Into<String>,
        injectable_workflow: impl Into<String>,
        client: reqwest::Client,
    ) -> Result<Self, RackHdError> {
        let address = base_url.into();
        let invalid = |reason: String| RackHdError::InvalidAddress {
            address: address.clone(),
            reason,
        };
        let base_url = Url::parse(address.trim_end_matches('/'))
            .map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("not a hierarchical URL".to_string()));
        }
        Ok(Self {
            base_url,
            injectable_workflow: injectable_workflow.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn template_url(&self, name: &str) -> Result<Url, RackHdError> {
        let name = identifier("template name", name)?;
        Ok(self.endpoint(&["templates", "library", name]))
    }

    pub fn workflows_url(&self) -> Url {
        self.endpoint(&["workflows"])
    }

    pub fn node_workflows_url(&self, node_id: &str) -> Result<Url, RackHdError> {
        let node_id = identifier("node id", node_id)?;
        // The empty segment keeps the trailing slash RackHD routes on.
        let mut url = self.endpoint(&["nodes", node_id, "workflows", ""]);
        url.query_pairs_mut()
            .append_pair("name", &self.injectable_workflow);
        Ok(url)
    }

    /// `PUT` a config template into the template library.
    pub async fn upload_template(&self, name: &str, config: &str) -> Result<String, RackHdError> {
        let url = self.template_url(name)?;
        self.send(Method::PUT, url, TEXT_PLAIN, config.as_bytes().to_vec())
            .await
    }

    /// `PUT` a workflow definition.
    pub async fn upload_workflow(&self, workflow: &str) -> Result<String, RackHdError> {
        let url = self.workflows_url();
        self.send(
            Method::PUT,
            url,
            APPLICATION_JSON,
            workflow.as_bytes().to_vec(),
        )
        .await
    }

    /// `POST` the injectable workflow to a node with `body` as the request body.
    pub async fn run_workflow(&self, node_id: &str, body: Vec<u8>) -> Result<String, RackHdError> {
        let url = self.node_workflows_url(node_id)?;
        self.send(Method::POST, url, APPLICATION_JSON, body).await
    }

    /// `{base}/api/1.1/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Hierarchical bases are checked on construction, so this always applies.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(API_ROOT)
                .extend(segments.iter().copied());
        }
        url
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        content_type: &'static str,
        body: Vec<u8>,
    ) -> Result<String, RackHdError> {
        debug!(%method, url = %url, bytes = body.len(), "sending RackHD request");

        // A Vec body has a known length, so reqwest sends Content-Length
        // rather than chunked encoding.
        let response = self
            .client
            .request(method, url.clone())
            .header(CONTENT_TYPE, content_type)
            .header(ACCEPT, APPLICATION_JSON)
            .body(body)
            .send()
            .await
            .map_err(|source| RackHdError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_else(|e| {
                debug!(url = %url, error = %e, "failed to read error response body");
                String::new()
            });
            return Err(RackHdError::UnexpectedStatus {
                url: url.to_string(),
                status,
                body,
            });
        }

        response.text().await.map_err(|source| RackHdError::Body {
            url: url.to_string(),
            source,
        })
    }
}

/// Reject identifiers that cannot stand as a single path segment.
fn identifier<'a>(what: &'static str, value: &'a str) -> Result<&'a str, RackHdError> {
    match value {
        "" | "." | ".." => Err(RackHdError::InvalidIdentifier {
            what,
            value: value.to_string(),
        }),
        _ => Ok(value),
    }
}
