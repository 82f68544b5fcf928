//! Shared constants used across the application.

/// User agent string used for page and asset requests.
///
/// A realistic browser user agent, since several relays and origins refuse
/// requests that look automated.
pub const CLONER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Number of attempts the retrying fetch primitive makes per request.
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;

/// Wall-clock limit for a single fetch attempt, in seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30;

/// Delay after the first failed attempt, in milliseconds. Doubles per attempt.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// File name the binary writes the cloned page to.
pub const DEFAULT_OUTPUT_FILE: &str = "cloned-page.html";

/// MIME type of the cloned page.
pub const OUTPUT_MIME_TYPE: &str = "text/html";

/// Permission set granted to every iframe in a snapshot.
pub const IFRAME_SANDBOX: &str = "allow-scripts allow-same-origin allow-popups allow-forms";

/// Placeholder substituted with the percent-encoded target in relay templates.
pub const RELAY_URL_PLACEHOLDER: &str = "{url}";
