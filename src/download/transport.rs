//! The network seam of the dispatcher.
//!
//! The dispatcher only sees [`Transport`]; production code uses
//! [`HttpTransport`], tests substitute a scripted fake.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Client;
use reqwest::header::{CONTENT_DISPOSITION, RETRY_AFTER};
use tracing::{debug, instrument};
use url::Url;

use super::DownloadError;
use crate::user_agent;

/// Response body as a stream of chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// Successful (2xx) response to a file request.
pub struct TransportResponse {
    /// `Content-Length`, when the server sent one.
    pub content_length: Option<u64>,
    /// Raw `Content-Disposition` header value.
    pub content_disposition: Option<String>,
    /// Body chunks.
    pub body: BodyStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("content_length", &self.content_length)
            .field("content_disposition", &self.content_disposition)
            .finish_non_exhaustive()
    }
}

/// Issues GET requests for files.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Requests `url`. Non-success statuses are returned as
    /// [`DownloadError::HttpStatus`].
    async fn get(&self, url: &str) -> Result<TransportResponse, DownloadError>;
}

/// [`Transport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Wraps an existing client so that file transfers share its pool.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, url: &str) -> Result<TransportResponse, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        let content_disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();
        debug!(?content_length, "response headers received");

        let owned_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| DownloadError::network(owned_url.as_str(), e)))
            .boxed();

        Ok(TransportResponse {
            content_length,
            content_disposition,
            body,
        })
    }
}

/// Builds the HTTP client shared by the web-service client and downloads.
///
/// # Errors
///
/// Returns the builder error if the TLS backend cannot be initialised.
pub fn build_http_client(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
        .build()
}
