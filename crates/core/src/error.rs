use thiserror::Error;

/// Failures while turning a raw task envelope or request body into a usable value.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid base64 body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("invalid json body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Invalid handlers configuration discovered at worker initialisation.
///
/// Fatal: the process exits with this message rather than starting the loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("handler mode requires a handler")]
    MissingHandler,
    #[error("proxy mode requires a base_url with a non-empty scheme and host, got `{0}`")]
    InvalidProxyBaseUrl(String),
    #[error("proxy mode requires a check_start callback")]
    MissingCheckStart,
    #[error("test mode is not supported in proxy mode")]
    TestModeUnsupportedForProxy,
}
