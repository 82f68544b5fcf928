//! Fetch layer: turns a resource URL into text or bytes.
//!
//! Requests go straight to the origin when the [`DirectFetch`] policy allows
//! it, then fall back to an ordered list of relay endpoints. Every request is
//! retried with exponential backoff and a per-attempt timeout.
//!
//! [`DirectFetch`]: crate::config::DirectFetch

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

pub mod client;
pub mod relay;
pub mod retry;

pub use client::Fetcher;
pub use relay::{default_relays, EnvelopeKind, RelayEndpoint};
pub use retry::{with_retry, RetryPolicy};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Failed to fetch after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
    #[error("All proxy services failed")]
    AllRelaysFailed { attempted: Vec<String> },
    #[error("relay {relay} returned an unreadable envelope: {source}")]
    Envelope {
        relay: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("relay {relay} returned an envelope without contents")]
    MissingContents { relay: String },
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Opaque binary content together with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl Blob {
    /// Encode as a base64 `data:` URI.
    #[must_use]
    pub fn to_data_uri(&self) -> String {
        let encoded_len = base64::encoded_len(self.bytes.len(), true).unwrap_or(0);
        let mut uri = String::with_capacity(encoded_len + self.mime.len() + 13);
        uri.push_str("data:");
        uri.push_str(&self.mime);
        uri.push_str(";base64,");
        STANDARD.encode_string(&self.bytes, &mut uri);
        uri
    }
}

/// Outcome of a binary fetch. Never an error: exhaustion is reported as
/// [`BinaryResource::Unavailable`] so callers can keep the original reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryResource {
    Fetched(Blob),
    Unavailable { attempted: Vec<String> },
}

/// What kind of content the caller wants back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub binary: bool,
}

/// Content returned by [`ResourceFetcher::fetch_resource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Text(String),
    Binary(Blob),
    Unavailable,
}

/// Seam between the snapshot assembler and whatever retrieves resources.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch a resource as text.
    ///
    /// # Errors
    ///
    /// Returns an error if every route to the resource failed.
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;

    /// Fetch a resource as opaque bytes.
    async fn fetch_binary(&self, url: &str) -> BinaryResource;

    /// Fetch a resource as text or bytes depending on `opts`.
    ///
    /// # Errors
    ///
    /// Returns an error only for textual requests; binary exhaustion yields
    /// [`Resource::Unavailable`].
    async fn fetch_resource(&self, url: &str, opts: FetchOptions) -> Result<Resource, FetchError> {
        if opts.binary {
            Ok(match self.fetch_binary(url).await {
                BinaryResource::Fetched(blob) => Resource::Binary(blob),
                BinaryResource::Unavailable { .. } => Resource::Unavailable,
            })
        } else {
            self.fetch_text(url).await.map(Resource::Text)
        }
    }
}
