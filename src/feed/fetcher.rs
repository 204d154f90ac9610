use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::util::{validate_url, UrlValidationError};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The configured URL could not be parsed
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL is not http(s); no request was made
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    /// Network-level error (DNS, connection, TLS, timeout)
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// HTTP response other than 200 OK
    #[error("HTTP error: status {0}")]
    BadStatus(u16),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

impl From<UrlValidationError> for FetchError {
    fn from(err: UrlValidationError) -> Self {
        match err {
            UrlValidationError::InvalidUrl(e) => FetchError::InvalidUrl(e),
            UrlValidationError::UnsupportedScheme(s) => FetchError::UnsupportedScheme(s),
        }
    }
}

/// Build the HTTP client shared by every fetch of the process.
///
/// `timeout` bounds each whole request; a hung server surfaces as
/// [`FetchError::Transport`] instead of stalling the cycle forever.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Retrieve the raw bytes of a feed with a single GET.
///
/// # Errors
///
/// - [`FetchError::InvalidUrl`] / [`FetchError::UnsupportedScheme`] before any
///   network activity
/// - [`FetchError::Transport`] for DNS, connection, TLS and timeout failures
/// - [`FetchError::BadStatus`] for any status other than 200
/// - [`FetchError::ResponseTooLarge`] if the body exceeds 10MB
///
/// No retries: a failed feed is simply tried again next cycle.
pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let url = validate_url(url)?;
    tracing::debug!(url = %url, "Fetching feed");

    let response = client.get(url.clone()).send().await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(FetchError::BadStatus(status.as_u16()));
    }

    let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
    tracing::debug!(url = %url, bytes = bytes.len(), "Fetched feed");
    Ok(bytes)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
