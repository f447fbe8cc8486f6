//! Proxy mode: forwards decoded proxy requests to the user's local server (§4.8).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use ease_core::ProxyRequestData;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

const CHECK_START_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy base url join failed: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid proxy method `{0}`")]
    InvalidMethod(String),
    #[error("invalid proxy header: {0}")]
    InvalidHeader(String),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

pub type CheckStartFuture = Pin<Box<dyn Future<Output = bool> + Send>>;
pub type CheckStartFn = Box<dyn Fn() -> CheckStartFuture + Send + Sync>;

/// Polls `check_start` every 500ms until it reports ready (§4.8).
pub async fn wait_until_ready(check_start: &CheckStartFn) {
    loop {
        if check_start().await {
            return;
        }
        tokio::time::sleep(CHECK_START_INTERVAL).await;
    }
}

/// Forwards decoded proxy requests to `base_url` and returns the raw upstream
/// response for streaming onward to the agent (§4.8).
pub struct ProxyAdapter {
    base_url: Url,
    http: reqwest::Client,
}

impl ProxyAdapter {
    pub fn new(base_url: Url) -> Self {
        ProxyAdapter {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub async fn forward(&self, data: &ProxyRequestData) -> Result<reqwest::Response, ProxyError> {
        let url = self.base_url.join(&data.uri)?;
        let method = reqwest::Method::from_bytes(data.method.as_bytes())
            .map_err(|_| ProxyError::InvalidMethod(data.method.clone()))?;

        let mut headers = HeaderMap::new();
        for (name, values) in &data.header {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProxyError::InvalidHeader(e.to_string()))?;
            for value in values {
                let header_value =
                    HeaderValue::from_str(value).map_err(|e| ProxyError::InvalidHeader(e.to_string()))?;
                headers.append(header_name.clone(), header_value);
            }
        }

        let mut req = self.http.request(method, url).headers(headers);
        if let Some(body) = &data.body {
            req = req.body(body.clone());
        }

        Ok(req.send().await?)
    }
}
