use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

pub const HDR_MODE: &str = "Ease-Mode";
pub const HDR_WEBHOOK: &str = "Ease-Webhook";
pub const HDR_REQUEST_ID: &str = "Ease-Request-Id";
pub const HDR_ENQUEUE_AT: &str = "Ease-Enqueue-At";
pub const HDR_CREATE_AT: &str = "Ease-Create-At";
pub const HDR_STATUS_SUBJECT: &str = "Ease-Status-Subject";
pub const HDR_TTL: &str = "Ease-Time-To-Live";

const DEFAULT_TTL_MS: i64 = 600_000;

/// The nine RFC 7230 hop-by-hop header names. Never forwarded from upstream to the agent.
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Sync,
    Async,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Sync => "sync",
            Mode::Async => "async",
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Sync
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Executing,
    Succeed,
    Failed,
}

/// Metadata extracted from the task envelope's HTTP-style headers (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgHeader {
    pub mode: Mode,
    pub webhook: String,
    pub request_id: String,
    pub status_subject: String,
    pub enqueue_at: i64,
    pub create_at: i64,
    pub ttl: i64,
}

impl MsgHeader {
    /// Values may be comma-joined; only the first element is taken. Missing numeric
    /// headers default to 0 (600,000 for ttl).
    pub fn parse(headers: &HashMap<String, String>) -> Self {
        let mode = match first_value(headers, HDR_MODE).as_deref() {
            Some("async") => Mode::Async,
            _ => Mode::Sync,
        };
        MsgHeader {
            mode,
            webhook: first_value(headers, HDR_WEBHOOK).unwrap_or_default(),
            request_id: first_value(headers, HDR_REQUEST_ID).unwrap_or_default(),
            status_subject: first_value(headers, HDR_STATUS_SUBJECT).unwrap_or_default(),
            enqueue_at: first_int(headers, HDR_ENQUEUE_AT, 0),
            create_at: first_int(headers, HDR_CREATE_AT, 0),
            ttl: first_int(headers, HDR_TTL, DEFAULT_TTL_MS),
        }
    }

    /// Inverse of `parse`, used by round-trip tests (P6).
    pub fn to_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            (HDR_MODE.to_string(), self.mode.as_str().to_string()),
            (HDR_WEBHOOK.to_string(), self.webhook.clone()),
            (HDR_REQUEST_ID.to_string(), self.request_id.clone()),
            (HDR_STATUS_SUBJECT.to_string(), self.status_subject.clone()),
            (HDR_ENQUEUE_AT.to_string(), self.enqueue_at.to_string()),
            (HDR_CREATE_AT.to_string(), self.create_at.to_string()),
            (HDR_TTL.to_string(), self.ttl.to_string()),
        ])
    }
}

fn first_value(headers: &HashMap<String, String>, key: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.split(',').next().unwrap_or("").trim().to_string())
}

fn first_int(headers: &HashMap<String, String>, key: &str, default: i64) -> i64 {
    first_value(headers, key)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

/// The raw `{headers, body}` envelope returned by `GET /apis/v1/request`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEnvelope {
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

/// A task pulled from the agent: parsed headers plus the decoded body.
#[derive(Debug, Clone)]
pub struct Task {
    pub header: MsgHeader,
    pub data: Vec<u8>,
}

impl Task {
    pub fn parse(envelope: TaskEnvelope) -> Result<Self, ParseError> {
        let header = MsgHeader::parse(&envelope.headers);
        let data = STANDARD.decode(envelope.body.as_bytes())?;
        Ok(Task { header, data })
    }
}

/// Status record reported to the agent at `/apis/v1/request-metric/{id}` (§3, §6).
///
/// Field order is significant: it fixes the JSON key order the agent expects.
#[derive(Debug, Clone, Serialize)]
pub struct RequestStatus {
    pub timestamp: i64,
    #[serde(rename = "requestID")]
    pub request_id: String,
    pub webhook: String,
    pub status: Status,
    pub operation: Mode,
    #[serde(rename = "enqueueTimestamp")]
    pub enqueue_timestamp: i64,
    #[serde(rename = "queueingDuration")]
    pub queueing_duration: i64,
    #[serde(rename = "executionDuration")]
    pub execution_duration: i64,
    #[serde(rename = "totalDuration")]
    pub total_duration: i64,
    #[serde(rename = "requestCreateAt")]
    pub request_create_at: i64,
    pub message: String,
}

#[allow(clippy::too_many_arguments)]
pub fn build_status(
    header: &MsgHeader,
    timestamp: i64,
    webhook: &str,
    status: Status,
    queueing_duration: i64,
    execution_duration: i64,
    total_duration: i64,
    message: impl Into<String>,
) -> RequestStatus {
    RequestStatus {
        timestamp,
        request_id: header.request_id.clone(),
        webhook: webhook.to_string(),
        status,
        operation: header.mode,
        enqueue_timestamp: header.enqueue_at,
        queueing_duration,
        execution_duration,
        total_duration,
        request_create_at: header.create_at,
        message: message.into(),
    }
}

/// A decoded proxy-mode task body (§3).
#[derive(Debug, Clone, Default)]
pub struct ProxyRequestData {
    pub method: String,
    pub uri: String,
    pub header: HashMap<String, Vec<String>>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
struct RawProxyRequestData {
    method: Option<String>,
    uri: Option<String>,
    #[serde(default)]
    header: HashMap<String, Vec<String>>,
    body: Option<String>,
}

impl ProxyRequestData {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let raw: RawProxyRequestData = serde_json::from_slice(data)?;
        let method = raw.method.ok_or(ParseError::MissingField("method"))?;
        let uri = raw.uri.ok_or(ParseError::MissingField("uri"))?;
        let body = raw.body.map(|b| STANDARD.decode(b.as_bytes())).transpose()?;
        Ok(ProxyRequestData {
            method,
            uri,
            header: raw.header,
            body,
        })
    }
}
