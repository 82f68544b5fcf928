use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::relay::RelayEndpoint;
use super::retry::{with_retry, RetryPolicy};
use super::{BinaryResource, Blob, FetchError, ResourceFetcher};
use crate::config::{Config, DirectFetch};

/// Content types that say nothing useful about a binary payload.
const GENERIC_MIME_TYPES: &[&str] = &[
    "application/octet-stream",
    "binary/octet-stream",
    "text/plain",
];

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// A successful response body.
#[derive(Debug)]
struct Payload {
    body: Vec<u8>,
    content_type: Option<String>,
}

/// HTTP-backed fetch layer with direct fetch and relay fallback.
///
/// Calls are independent of each other; the relay list is shared read-only.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    relays: Vec<RelayEndpoint>,
    policy: RetryPolicy,
    direct: DirectFetch,
}

impl Fetcher {
    /// Create a fetcher from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.attempt_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self::with_client(
            client,
            config.relays.clone(),
            config.retry_policy(),
            config.direct_fetch,
        ))
    }

    #[must_use]
    pub fn with_client(
        client: Client,
        relays: Vec<RelayEndpoint>,
        policy: RetryPolicy,
        direct: DirectFetch,
    ) -> Self {
        Self {
            client,
            relays,
            policy,
            direct,
        }
    }

    async fn get_once(&self, url: &str) -> Result<Payload, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                source: e,
            })?
            .to_vec();

        Ok(Payload { body, content_type })
    }

    async fn get_with_retry(&self, url: &str) -> Result<Payload, FetchError> {
        with_retry(&self.policy, url, |_| self.get_once(url)).await
    }

    /// Single attempt at the origin itself. Failures are only logged.
    async fn get_direct(&self, url: &str) -> Option<Payload> {
        let probe = RetryPolicy::single(self.direct_timeout());
        match with_retry(&probe, url, |_| self.get_once(url)).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(url = %url, error = %e, "Direct fetch failed, falling back to relays");
                None
            }
        }
    }

    fn direct_timeout(&self) -> Duration {
        self.policy.attempt_timeout
    }
}

#[async_trait]
impl ResourceFetcher for Fetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        if self.direct.applies_to(false) {
            if let Some(payload) = self.get_direct(url).await {
                return Ok(String::from_utf8_lossy(&payload.body).into_owned());
            }
        }

        let mut attempted = Vec::with_capacity(self.relays.len());
        for relay in &self.relays {
            let relay_url = relay.url_for(url);
            attempted.push(relay_url.clone());

            match self
                .get_with_retry(&relay_url)
                .await
                .and_then(|payload| relay.unwrap_text(&payload.body))
            {
                Ok(text) => {
                    debug!(url = %url, relay = %relay.name, bytes = text.len(), "Fetched text via relay");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(url = %url, relay = %relay.name, error = %e, "Relay failed");
                }
            }
        }

        Err(FetchError::AllRelaysFailed { attempted })
    }

    async fn fetch_binary(&self, url: &str) -> BinaryResource {
        if self.direct.applies_to(true) {
            if let Some(payload) = self.get_direct(url).await {
                return BinaryResource::Fetched(into_blob(payload, url));
            }
        }

        let mut attempted = Vec::new();
        for relay in self.relays.iter().filter(|r| r.envelope.carries_binary()) {
            let relay_url = relay.url_for(url);
            attempted.push(relay_url.clone());

            match self.get_with_retry(&relay_url).await {
                Ok(payload) => {
                    debug!(url = %url, relay = %relay.name, bytes = payload.body.len(), "Fetched binary via relay");
                    return BinaryResource::Fetched(into_blob(payload, url));
                }
                Err(e) => {
                    warn!(url = %url, relay = %relay.name, error = %e, "Relay failed");
                }
            }
        }

        BinaryResource::Unavailable { attempted }
    }
}

fn into_blob(payload: Payload, url: &str) -> Blob {
    let mime = detect_mime(payload.content_type.as_deref(), url);
    Blob {
        bytes: payload.body,
        mime,
    }
}

/// Pick a MIME type from the response header, or guess it from the URL path.
#[must_use]
pub fn detect_mime(content_type: Option<&str>, url: &str) -> String {
    let declared = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && !GENERIC_MIME_TYPES.contains(&ct.as_str()));

    declared.unwrap_or_else(|| {
        Url::parse(url)
            .ok()
            .and_then(|u| mime_guess::from_path(u.path()).first_raw())
            .unwrap_or(FALLBACK_MIME_TYPE)
            .to_string()
    })
}
