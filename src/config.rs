use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    CLONER_USER_AGENT, DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_BACKOFF_BASE_MS,
    DEFAULT_FETCH_ATTEMPTS, DEFAULT_OUTPUT_FILE, RELAY_URL_PLACEHOLDER,
};
use crate::fetch::{default_relays, RelayEndpoint, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to read relay file {path}: {source}")]
    RelayFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse relay file {path}: {source}")]
    RelayFileParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// When to try the origin itself before going through relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectFetch {
    /// Always go through relays.
    Never,
    /// Try the origin first for images, media and icons only.
    BinaryOnly,
    /// Try the origin first for everything.
    Always,
}

impl DirectFetch {
    #[must_use]
    pub fn applies_to(self, binary: bool) -> bool {
        match self {
            Self::Never => false,
            Self::BinaryOnly => binary,
            Self::Always => true,
        }
    }
}

/// Cloner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Relays
    pub relays: Vec<RelayEndpoint>,
    pub direct_fetch: DirectFetch,

    // Retrying fetch
    pub fetch_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    pub user_agent: String,

    // Fan-out
    pub max_concurrent_fetches: Option<usize>,

    // Output
    pub output_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RelayFile {
    #[serde(default)]
    relay: Vec<RelayEndpoint>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            direct_fetch: DirectFetch::BinaryOnly,
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            user_agent: CLONER_USER_AGENT.to_string(),
            max_concurrent_fetches: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_FILE),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value or the
    /// relay file cannot be loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let relays = match optional_env("CLONER_RELAYS_FILE") {
            Some(path) => load_relays(Path::new(&path))?,
            None => defaults.relays,
        };

        let max_concurrent_fetches = match parse_env_usize("CLONER_MAX_CONCURRENT_FETCHES", 0)? {
            0 => None,
            n => Some(n),
        };

        Ok(Self {
            relays,
            direct_fetch: parse_direct_fetch(&env_or_default("CLONER_DIRECT_FETCH", "binary"))?,
            fetch_attempts: parse_env_u32("CLONER_FETCH_ATTEMPTS", DEFAULT_FETCH_ATTEMPTS)?,
            attempt_timeout: Duration::from_secs(parse_env_u64(
                "CLONER_ATTEMPT_TIMEOUT_SECS",
                DEFAULT_ATTEMPT_TIMEOUT_SECS,
            )?),
            backoff_base: Duration::from_millis(parse_env_u64(
                "CLONER_BACKOFF_BASE_MS",
                DEFAULT_BACKOFF_BASE_MS,
            )?),
            user_agent: env_or_default("CLONER_USER_AGENT", CLONER_USER_AGENT),
            max_concurrent_fetches,
            output_path: PathBuf::from(env_or_default("CLONER_OUTPUT_PATH", DEFAULT_OUTPUT_FILE)),
        })
    }

    /// Configuration with short timeouts, for tests against local servers.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            direct_fetch: DirectFetch::Never,
            attempt_timeout: Duration::from_secs(2),
            backoff_base: Duration::from_millis(10),
            ..Self::default()
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "CLONER_FETCH_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "CLONER_ATTEMPT_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.relays.is_empty() && self.direct_fetch == DirectFetch::Never {
            return Err(ConfigError::InvalidValue {
                name: "CLONER_RELAYS_FILE".to_string(),
                message: "no relays configured and direct fetch disabled".to_string(),
            });
        }
        if let Some(relay) = self
            .relays
            .iter()
            .find(|r| !r.template.contains(RELAY_URL_PLACEHOLDER))
        {
            return Err(ConfigError::InvalidValue {
                name: "CLONER_RELAYS_FILE".to_string(),
                message: format!(
                    "relay '{}' template has no {RELAY_URL_PLACEHOLDER} placeholder",
                    relay.name
                ),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.fetch_attempts,
            attempt_timeout: self.attempt_timeout,
            backoff_base: self.backoff_base,
        }
    }
}

/// Load an ordered relay list from a TOML file of `[[relay]]` tables.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_relays(path: &Path) -> Result<Vec<RelayEndpoint>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::RelayFileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_relays(&raw).map_err(|e| ConfigError::RelayFileParse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_relays(raw: &str) -> Result<Vec<RelayEndpoint>, toml::de::Error> {
    toml::from_str::<RelayFile>(raw).map(|file| file.relay)
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_direct_fetch(value: &str) -> Result<DirectFetch, ConfigError> {
    match value.to_lowercase().as_str() {
        "never" => Ok(DirectFetch::Never),
        "binary" => Ok(DirectFetch::BinaryOnly),
        "always" => Ok(DirectFetch::Always),
        _ => Err(ConfigError::InvalidValue {
            name: "CLONER_DIRECT_FETCH".to_string(),
            message: format!("must be 'never', 'binary' or 'always', got '{value}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::fetch::EnvelopeKind;

    #[test]
    fn test_parse_direct_fetch() {
        assert_eq!(parse_direct_fetch("never").unwrap(), DirectFetch::Never);
        assert_eq!(parse_direct_fetch("BINARY").unwrap(), DirectFetch::BinaryOnly);
        assert_eq!(parse_direct_fetch("always").unwrap(), DirectFetch::Always);
        assert!(parse_direct_fetch("sometimes").is_err());
    }

    #[test]
    fn test_direct_fetch_applies_to() {
        assert!(!DirectFetch::Never.applies_to(true));
        assert!(DirectFetch::BinaryOnly.applies_to(true));
        assert!(!DirectFetch::BinaryOnly.applies_to(false));
        assert!(DirectFetch::Always.applies_to(false));
    }

    #[test]
    fn test_parse_relays() {
        let raw = r#"
            [[relay]]
            name = "first"
            template = "https://relay.one/get?url={url}"
            envelope = "json_contents"

            [[relay]]
            name = "second"
            template = "https://relay.two/{url}"
            envelope = "raw"
        "#;
        let relays = parse_relays(raw).unwrap();
        assert_eq!(relays.len(), 2);
        assert_eq!(relays[0].name, "first");
        assert_eq!(relays[0].envelope, EnvelopeKind::JsonContents);
        assert_eq!(relays[1].envelope, EnvelopeKind::Raw);
    }

    #[test]
    fn test_parse_relays_rejects_unknown_envelope() {
        let raw = r#"
            [[relay]]
            name = "bad"
            template = "https://relay/{url}"
            envelope = "xml"
        "#;
        assert!(parse_relays(raw).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let no_attempts = Config {
            fetch_attempts: 0,
            ..Config::default()
        };
        assert!(no_attempts.validate().is_err());

        let no_route = Config {
            relays: Vec::new(),
            direct_fetch: DirectFetch::Never,
            ..Config::default()
        };
        assert!(no_route.validate().is_err());

        let no_placeholder = Config {
            relays: vec![RelayEndpoint::new("x", "https://relay/", EnvelopeKind::Raw)],
            ..Config::default()
        };
        assert!(no_placeholder.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("CLONER_FETCH_ATTEMPTS", "5");
        std::env::set_var("CLONER_DIRECT_FETCH", "never");
        std::env::set_var("CLONER_MAX_CONCURRENT_FETCHES", "8");

        let config = Config::from_env().unwrap();

        std::env::remove_var("CLONER_FETCH_ATTEMPTS");
        std::env::remove_var("CLONER_DIRECT_FETCH");
        std::env::remove_var("CLONER_MAX_CONCURRENT_FETCHES");

        assert_eq!(config.fetch_attempts, 5);
        assert_eq!(config.direct_fetch, DirectFetch::Never);
        assert_eq!(config.max_concurrent_fetches, Some(8));
        assert_eq!(config.relays, default_relays());
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        std::env::set_var("CLONER_ATTEMPT_TIMEOUT_SECS", "soon");
        let result = Config::from_env();
        std::env::remove_var("CLONER_ATTEMPT_TIMEOUT_SECS");
        assert!(matches!(result, Err(ConfigError::ParseInt { .. })));
    }
}
