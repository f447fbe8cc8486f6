//! Typed HTTP client to the agent sidecar (§4.4, §6).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ease_core::task::is_hop_by_hop;
use ease_core::{ParseError, RequestStatus, Task, TaskEnvelope};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use thiserror::Error;
use url::Url;

const HEADER_HEALTH: &str = "X-Agent-Health";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("agent returned unexpected status {status} fetching next task: {body}")]
    AgentUnavailable { status: u16, body: String },
    #[error("agent result endpoint returned status {status}: {body}")]
    ResultRejected { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid agent base url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to parse task: {0}")]
    Parse(#[from] ParseError),
    #[error("invalid header name or value: {0}")]
    InvalidHeader(String),
}

/// A single persistent HTTP client targeting the agent (§4.4).
pub struct AgentClient {
    http: reqwest::Client,
    base: Url,
}

#[derive(Serialize)]
struct ResultPayload<'a> {
    #[serde(rename = "statusCode")]
    status_code: u16,
    message: &'a str,
    data: String,
}

#[derive(Serialize)]
struct HeartbeatPayload<'a> {
    #[serde(rename = "requestIDs")]
    request_ids: &'a [String],
}

impl AgentClient {
    pub fn new(agent_url: &str) -> Result<Self, ClientError> {
        Ok(AgentClient {
            http: reqwest::Client::new(),
            base: Url::parse(agent_url)?,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base.join(path).map_err(ClientError::from)
    }

    /// GET `/apis/v1/request`. 200 parses a task, 404 reports none, anything else
    /// is an `AgentUnavailable` error.
    pub async fn next(&self) -> Result<(Option<Task>, bool), ClientError> {
        let resp = self.http.get(self.url("/apis/v1/request")?).send().await?;

        let healthy = resp
            .headers()
            .get(HEADER_HEALTH)
            .and_then(|v| v.to_str().ok())
            .map(|v| v != "false")
            .unwrap_or(true);

        match resp.status().as_u16() {
            200 => {
                let envelope: TaskEnvelope = resp.json().await?;
                let task = Task::parse(envelope)?;
                Ok((Some(task), healthy))
            }
            404 => Ok((None, healthy)),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ClientError::AgentUnavailable { status, body })
            }
        }
    }

    /// POST `/apis/v1/request-ack/{id}`. Non-200 is logged, never surfaced.
    pub async fn ack(&self, request_id: &str) {
        let url = match self.url(&format!("/apis/v1/request-ack/{request_id}")) {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(request_id, error = %e, "failed to build ack url");
                return;
            }
        };
        match self.http.post(url).send().await {
            Ok(resp) if resp.status().as_u16() == 200 => {
                tracing::debug!(request_id, "ack request");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(request_id, %status, body, "failed to ack request");
            }
            Err(e) => tracing::error!(request_id, error = %e, "failed to ack request"),
        }
    }

    /// POST `/apis/v1/request-metric/{id}`. Best-effort, never surfaced.
    pub async fn report_status(&self, request_id: &str, status: &RequestStatus) {
        let url = match self.url(&format!("/apis/v1/request-metric/{request_id}")) {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(request_id, error = %e, "failed to build status url");
                return;
            }
        };
        match self.http.post(url).json(status).send().await {
            Ok(resp) if resp.status().as_u16() == 200 => {
                tracing::debug!(request_id, "report status for request");
            }
            Ok(resp) => {
                let status_code = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(request_id, status = %status_code, body, "failed to report status for request");
            }
            Err(e) => tracing::error!(request_id, error = %e, "failed to report status for request"),
        }
    }

    /// POST `/apis/v1/request-result/{id}`, body `{statusCode, message, data(base64)}`.
    ///
    /// A single attempt; the caller (the worker loop) decides how a failure here
    /// folds into the overall delivery error.
    pub async fn send_result(
        &self,
        request_id: &str,
        status_code: u16,
        message: &str,
        data: &[u8],
    ) -> Result<(), ClientError> {
        let url = self.url(&format!("/apis/v1/request-result/{request_id}"))?;
        let payload = ResultPayload {
            status_code,
            message,
            data: STANDARD.encode(data),
        };
        let resp = self.http.post(url).json(&payload).send().await?;
        if resp.status().as_u16() != 200 {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::ResultRejected { status, body });
        }
        Ok(())
    }

    /// POST `/apis/v1/request-proxy/{id}?statusCode=<n>`, streaming the upstream
    /// response body through unbuffered when possible (§4.4, §4.8).
    pub async fn send_proxy(
        &self,
        request_id: &str,
        status_code: u16,
        upstream: reqwest::Response,
    ) -> Result<u16, ClientError> {
        let url = self.proxy_url(request_id, status_code)?;
        let headers = forward_headers(upstream.headers())?;
        let has_content_length = upstream.headers().contains_key(reqwest::header::CONTENT_LENGTH);

        let mut req = self.http.post(url).headers(headers);
        req = if has_content_length {
            req.body(upstream.bytes().await?)
        } else {
            req.body(reqwest::Body::wrap_stream(upstream.bytes_stream()))
        };

        let resp = req.send().await?;
        Ok(resp.status().as_u16())
    }

    /// Buffered variant of `send_proxy`, used when the proxy path fails before an
    /// upstream response exists.
    pub async fn send_proxy_result(
        &self,
        request_id: &str,
        status_code: u16,
        data: &[u8],
    ) -> Result<u16, ClientError> {
        let url = self.proxy_url(request_id, status_code)?;
        let resp = self
            .http
            .post(url)
            .body(data.to_vec())
            .send()
            .await?;
        Ok(resp.status().as_u16())
    }

    fn proxy_url(&self, request_id: &str, status_code: u16) -> Result<Url, ClientError> {
        let mut url = self.url(&format!("/apis/v1/request-proxy/{request_id}"))?;
        url.query_pairs_mut()
            .append_pair("statusCode", &status_code.to_string());
        Ok(url)
    }

    /// POST `/apis/v1/heartbeat`, body `{requestIDs: [...]}`. No retry here; the
    /// heartbeat task itself wraps this in exponential backoff (§4.6).
    pub async fn heartbeat(&self, request_ids: &[String]) -> Result<(), ClientError> {
        let url = self.url("/apis/v1/heartbeat")?;
        let payload = HeartbeatPayload { request_ids };
        let resp = self.http.post(url).json(&payload).send().await?;
        if resp.status().as_u16() != 200 {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::AgentUnavailable { status, body });
        }
        Ok(())
    }

    /// Releases the underlying client. `reqwest::Client` needs no explicit teardown;
    /// this exists for symmetry with the rest of the lifecycle.
    pub fn close(self) {}
}

/// Copies response headers, dropping the nine hop-by-hop names (§4.4, §9).
fn forward_headers(upstream: &reqwest::header::HeaderMap) -> Result<HeaderMap, ClientError> {
    let mut out = HeaderMap::new();
    for (name, value) in upstream.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|e| ClientError::InvalidHeader(e.to_string()))?;
        let value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|e| ClientError::InvalidHeader(e.to_string()))?;
        out.append(name, value);
    }
    Ok(out)
}
