//! Shared HTTP fetch primitive.
//!
//! Every site client issues its requests through [`FetchClient`]: a single
//! configured `reqwest` client with connection pooling, compression, a cookie
//! store, and bounded timeouts. The response shape deliberately carries the
//! post-redirect URL alongside the body bytes — some sites redirect reader
//! pages, and the derived API request is keyed off the final path.
//!
//! Retry, backoff, and rate limiting are out of scope here; callers get one
//! attempt per `fetch`.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

/// Failure surfaced by [`FetchClient`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { status: StatusCode, url: String },
}

/// Raw fetch result: body bytes plus the URL they were actually served from.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// URL after following redirects.
    pub final_url: String,
    pub status: StatusCode,
    pub bytes: Vec<u8>,
}

impl FetchResponse {
    /// Body decoded as lossy UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Pooled HTTP client shared by all site clients.
pub struct FetchClient {
    client: Client,
}

impl FetchClient {
    /// Create the shared client.
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            // HTTP/2 where the server negotiates it
            .http2_adaptive_window(true)
            // Keep connections alive for reuse across plugin calls
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            // Compression (auto-negotiated via Accept-Encoding)
            .brotli(true)
            .zstd(true)
            .gzip(true)
            .deflate(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true)
            .build()?;

        Ok(Self { client })
    }

    /// Fetch `url` with `headers` applied on top of the client defaults.
    ///
    /// A non-success HTTP status is an error; the contract boundary in the
    /// site clients turns it into an empty result like any other failure.
    pub async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<FetchResponse, FetchError> {
        debug!(%url, "fetching");
        let response = self.client.get(url).headers(headers.clone()).send().await?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: final_url,
            });
        }

        let bytes = response.bytes().await?.to_vec();
        debug!(%status, len = bytes.len(), "response received");

        Ok(FetchResponse {
            final_url,
            status,
            bytes,
        })
    }

    /// Fetch and return `(body text, final URL)`.
    pub async fn fetch_text(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<(String, String), FetchError> {
        let response = self.fetch(url, headers).await?;
        Ok((response.text(), response.final_url))
    }
}

impl Default for FetchClient {
    fn default() -> Self {
        Self::new().expect("Failed to create default client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_text_is_lossy() {
        let response = FetchResponse {
            final_url: "https://example.com/".to_string(),
            status: StatusCode::OK,
            bytes: b"caf\xe9".to_vec(),
        };
        assert_eq!(response.text(), "caf\u{fffd}");
    }

    #[test]
    fn status_error_names_url() {
        let err = FetchError::Status {
            status: StatusCode::NOT_FOUND,
            url: "https://example.com/missing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP 404 Not Found for https://example.com/missing"
        );
    }
}
