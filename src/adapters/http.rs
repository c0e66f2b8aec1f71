//! HTTP agent connector — reqwest-based implementation of the mesh
//! transport seam for http(s)-addressed agents.
//!
//! Calls POST `{address}/call` with `{capability, payload}`; probes GET
//! `{address}{probe_path}`. Status codes map onto the call-error
//! taxonomy: 4xx is a rejection (non-retryable), 5xx an internal agent
//! error (retryable), transport failures and timeouts are unreachable.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use crate::error::AgentCallError;
use crate::mesh::traits::AgentConnector;
use crate::mesh::types::AgentDescriptor;

pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client with static configuration");
        Self { client }
    }

    fn base_url(descriptor: &AgentDescriptor) -> Result<Url, AgentCallError> {
        let endpoint = descriptor
            .endpoints
            .iter()
            .find(|e| matches!(e.protocol.as_str(), "http" | "https"))
            .ok_or_else(|| AgentCallError::Unreachable {
                reason: format!("agent {} has no http endpoint", descriptor.name),
            })?;
        let mut url =
            Url::parse(&endpoint.address).map_err(|e| AgentCallError::Unreachable {
                reason: format!("invalid endpoint address {}: {e}", endpoint.address),
            })?;
        // Url::join replaces the last path segment unless the base ends
        // with a slash.
        if !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }
        Ok(url)
    }

    fn map_transport_error(err: reqwest::Error, started: Instant) -> AgentCallError {
        if err.is_timeout() {
            AgentCallError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        } else {
            AgentCallError::Unreachable {
                reason: err.to_string(),
            }
        }
    }

    fn map_status(status: reqwest::StatusCode, body: String) -> AgentCallError {
        if status.is_client_error() {
            AgentCallError::Rejected {
                status: status.as_u16(),
                reason: body,
            }
        } else {
            AgentCallError::Internal {
                status: status.as_u16(),
                reason: body,
            }
        }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentConnector for HttpConnector {
    async fn call(
        &self,
        descriptor: &AgentDescriptor,
        capability: &str,
        payload: &Value,
    ) -> Result<Value, AgentCallError> {
        let base = Self::base_url(descriptor)?;
        let url = base.join("call").map_err(|e| AgentCallError::Unreachable {
            reason: format!("cannot build call url: {e}"),
        })?;

        let started = Instant::now();
        let response = self
            .client
            .post(url)
            .json(&json!({ "capability": capability, "payload": payload }))
            .send()
            .await
            .map_err(|e| Self::map_transport_error(e, started))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AgentCallError::Internal {
                status: status.as_u16(),
                reason: format!("malformed response body: {e}"),
            })
    }

    async fn probe(&self, descriptor: &AgentDescriptor) -> Result<(), AgentCallError> {
        let base = Self::base_url(descriptor)?;
        let path = descriptor.health.probe_path.trim_start_matches('/');
        let url = base.join(path).map_err(|e| AgentCallError::Unreachable {
            reason: format!("cannot build probe url: {e}"),
        })?;

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::map_transport_error(e, started))?;

        let status = response.status();
        if status.is_success() {
            debug!(agent = %descriptor.name, latency_ms = started.elapsed().as_millis() as u64, "probe ok");
            Ok(())
        } else {
            Err(Self::map_status(status, format!("probe status {status}")))
        }
    }
}
