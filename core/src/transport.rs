//! Executing `HttpRequest` values against the network.
//!
//! `Transport` is the seam between the orchestrator and real I/O. Tests
//! substitute scripted transports; production uses `UreqTransport`.

use std::time::Duration;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};

/// Performs one blocking round-trip. Implementations must be safe to share
/// between concurrent orchestration runs.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest, timeout: Duration)
        -> Result<HttpResponse, TransportError>;
}

/// Blocking transport backed by a shared `ureq::Agent`.
///
/// The agent is configured with `http_status_as_error(false)` so 4xx/5xx
/// replies come back as data and the client decides what they mean.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn execute(
        &self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        // The workflow service is only ever posted to.
        let mut builder = self.agent.post(&request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        let builder = builder.config().timeout_global(Some(timeout)).build();
        let sent = match &request.body {
            Some(body) => builder.send(body.as_bytes()),
            None => builder.send_empty(),
        };

        let mut response = sent.map_err(|e| match e {
            ureq::Error::Timeout(_) => TransportError::Timeout(timeout),
            other => TransportError::Connect(other.to_string()),
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| TransportError::Read(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
