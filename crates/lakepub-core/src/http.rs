//! HTTP client construction and the shared runtime.
//!
//! Uses async reqwest internally but presents sync call sites: callers
//! `block_on` the shared runtime, which keeps rayon workers simple.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

/// Default connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default whole-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Error talking to the record service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    /// Response status, when the server answered at all
    pub status: Option<u16>,
    pub message: String,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(s) => write!(f, "HTTP {s}: {}", self.message),
            None => write!(f, "HTTP error: {}", self.message),
        }
    }
}

impl std::error::Error for HttpError {}

impl HttpError {
    /// Create HTTP error from reqwest error.
    ///
    /// The URL is stripped so request targets don't leak into logs.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        let message = if e.is_timeout() {
            "request timed out".to_string()
        } else if e.is_connect() {
            "connection failed".to_string()
        } else {
            e.without_url().to_string()
        };
        Self { status, message }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

/// Timeouts applied to every request of a client
#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Build a pooled client that sends `Authorization: Bearer <token>` on every request.
pub fn build_client(
    settings: &HttpSettings,
    bearer: Option<&str>,
) -> Result<reqwest::Client, HttpError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = bearer {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| HttpError::other("credential contains invalid header characters"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .pool_max_idle_per_host(8)
        .build()
        .map_err(HttpError::from_reqwest)
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});
