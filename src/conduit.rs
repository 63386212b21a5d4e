//! Conduit API client.
//!
//! Phabricator exposes every API method at `<server>/api/<method>`. Requests
//! are form-encoded and carry the API token as `api.token`; responses are
//! wrapped in an envelope:
//!
//! ```json
//! { "result": { "data": [...], "cursor": { "before": null, "after": "42" } },
//!   "error_code": null,
//!   "error_info": null }
//! ```
//!
//! A `null` result without an error code is the explicit "no data" signal.
//!
//! The [`Conduit`] trait is the seam between the synchronizer and the
//! network: [`ConduitClient`] is the HTTP implementation, tests substitute a
//! scripted one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::PhabricatorConfig;
use crate::error::ConduitError;
use crate::models::{Page, Query};
use crate::paginate::PageSource;

/// Maniphest task search.
pub const TASK_SEARCH: &str = "maniphest.search";
/// Phriction wiki content search.
pub const PHRICTION_SEARCH: &str = "phriction.content.search";
/// Transaction (and comment) search.
pub const TRANSACTION_SEARCH: &str = "transaction.search";
/// Returns the user owning the API token.
pub const WHOAMI: &str = "user.whoami";

/// Calls one Conduit search method.
#[async_trait]
pub trait Conduit: Send + Sync {
    /// Invoke `method` with `query`.
    ///
    /// Returns `Ok(None)` when the server answers with an empty result.
    async fn call(&self, method: &str, query: &Query) -> Result<Option<Page>, ConduitError>;
}

/// A Conduit method bound to a client, usable as a [`PageSource`].
pub struct Endpoint<'a> {
    conduit: &'a dyn Conduit,
    method: &'static str,
}

impl<'a> Endpoint<'a> {
    pub fn new(conduit: &'a dyn Conduit, method: &'static str) -> Self {
        Self { conduit, method }
    }
}

#[async_trait]
impl PageSource for Endpoint<'_> {
    fn name(&self) -> &str {
        self.method
    }

    async fn fetch_page(&self, query: &Query) -> Result<Option<Page>, ConduitError> {
        self.conduit.call(self.method, query).await
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_info: Option<String>,
}

/// HTTP client for a Phabricator server.
pub struct ConduitClient {
    server_url: reqwest::Url,
    api_url: reqwest::Url,
    token: String,
    http: reqwest::Client,
}

impl ConduitClient {
    /// Build a client from configuration, resolving the API token.
    pub fn new(config: &PhabricatorConfig) -> Result<Self> {
        let token = config.resolve_token()?;
        let server_url = reqwest::Url::parse(&config.url)
            .with_context(|| format!("Invalid Phabricator URL: {}", config.url))?;
        let api_url = server_url
            .join("/api/")
            .with_context(|| format!("Cannot derive API URL from {}", server_url))?;

        if !config.verify_ssl {
            warn!(url = %server_url, "TLS certificate verification is disabled");
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            server_url,
            api_url,
            token,
            http,
        })
    }

    /// `GET` the server root and require a success status.
    pub async fn check_server_health(&self) -> Result<(), ConduitError> {
        let endpoint = self.server_url.as_str();
        let resp = self
            .http
            .get(self.server_url.clone())
            .send()
            .await
            .map_err(|source| ConduitError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(ConduitError::Status {
                endpoint: endpoint.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Confirm the API token is accepted by calling `user.whoami`.
    pub async fn validate_authentication(&self) -> Result<(), ConduitError> {
        match self.invoke(WHOAMI, &Query::new()).await? {
            Some(_) => Ok(()),
            None => Err(ConduitError::Authentication {
                endpoint: WHOAMI.to_string(),
                message: "no user returned for token".to_string(),
            }),
        }
    }

    /// POST `method` and unwrap the Conduit envelope.
    async fn invoke(
        &self,
        method: &str,
        query: &Query,
    ) -> Result<Option<serde_json::Value>, ConduitError> {
        let url = self
            .api_url
            .join(method)
            .map_err(|e| ConduitError::malformed(method, e))?;

        let mut form: Vec<(&str, &str)> = Vec::with_capacity(query.len() + 1);
        form.push(("api.token", self.token.as_str()));
        form.extend(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let resp = self
            .http
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|source| ConduitError::Transport {
                endpoint: method.to_string(),
                source,
            })?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ConduitError::Authentication {
                endpoint: method.to_string(),
                message: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(ConduitError::Status {
                endpoint: method.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(|source| ConduitError::Transport {
            endpoint: method.to_string(),
            source,
        })?;
        decode_envelope(method, &body)
    }
}

#[async_trait]
impl Conduit for ConduitClient {
    async fn call(&self, method: &str, query: &Query) -> Result<Option<Page>, ConduitError> {
        match self.invoke(method, query).await? {
            Some(result) => serde_json::from_value(result)
                .map(Some)
                .map_err(|e| ConduitError::malformed(method, e)),
            None => Ok(None),
        }
    }
}

/// Unwrap a Conduit envelope, surfacing `error_code` as an error.
fn decode_envelope(method: &str, body: &str) -> Result<Option<serde_json::Value>, ConduitError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| ConduitError::malformed(method, e))?;
    if let Some(code) = envelope.error_code {
        return Err(ConduitError::from_code(method, code, envelope.error_info));
    }
    Ok(envelope.result.filter(|result| !result.is_null()))
}
