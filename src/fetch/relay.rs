//! Cross-origin relay endpoints.
//!
//! A relay fetches a resource on our behalf and hands it back, which gets
//! around origins that refuse direct requests. Each endpoint declares up front
//! how it wraps the payload so the response never has to be sniffed.

use serde::Deserialize;

use super::FetchError;
use crate::constants::RELAY_URL_PLACEHOLDER;

/// How a relay wraps the payload it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// The response body is the resource itself.
    Raw,
    /// The response body is a JSON object whose `contents` field holds the resource text.
    JsonContents,
}

impl EnvelopeKind {
    /// Whether this envelope can carry opaque bytes (images, fonts, media).
    #[must_use]
    pub fn carries_binary(self) -> bool {
        matches!(self, Self::Raw)
    }
}

/// A single relay service, tried in the order it appears in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayEndpoint {
    /// Short name used in logs.
    pub name: String,
    /// URL template containing a `{url}` placeholder for the encoded target.
    pub template: String,
    /// Payload wrapping used by this relay.
    pub envelope: EnvelopeKind,
}

#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    contents: Option<serde_json::Value>,
}

impl RelayEndpoint {
    #[must_use]
    pub fn new(name: &str, template: &str, envelope: EnvelopeKind) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            envelope,
        }
    }

    /// Build the relay URL for `target`.
    #[must_use]
    pub fn url_for(&self, target: &str) -> String {
        self.template
            .replace(RELAY_URL_PLACEHOLDER, &urlencoding::encode(target))
    }

    /// Extract the resource text from a relay response body.
    ///
    /// # Errors
    ///
    /// Returns an error if a JSON envelope cannot be parsed or has no string
    /// `contents` field.
    pub fn unwrap_text(&self, body: &[u8]) -> Result<String, FetchError> {
        match self.envelope {
            EnvelopeKind::Raw => Ok(String::from_utf8_lossy(body).into_owned()),
            EnvelopeKind::JsonContents => {
                let envelope: JsonEnvelope =
                    serde_json::from_slice(body).map_err(|e| FetchError::Envelope {
                        relay: self.name.clone(),
                        source: e,
                    })?;
                match envelope.contents {
                    Some(serde_json::Value::String(contents)) => Ok(contents),
                    _ => Err(FetchError::MissingContents {
                        relay: self.name.clone(),
                    }),
                }
            }
        }
    }
}

/// Relays used when no relay file is configured, highest priority first.
#[must_use]
pub fn default_relays() -> Vec<RelayEndpoint> {
    vec![
        RelayEndpoint::new(
            "allorigins",
            "https://api.allorigins.win/get?url={url}&charset=UTF-8",
            EnvelopeKind::JsonContents,
        ),
        RelayEndpoint::new(
            "htmldriven",
            "https://cors-proxy.htmldriven.com/?url={url}",
            EnvelopeKind::Raw,
        ),
        RelayEndpoint::new(
            "codetabs",
            "https://api.codetabs.com/v1/proxy?quest={url}",
            EnvelopeKind::Raw,
        ),
        RelayEndpoint::new(
            "allorigins-raw",
            "https://api.allorigins.win/raw?url={url}",
            EnvelopeKind::Raw,
        ),
    ]
}
