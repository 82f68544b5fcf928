//! Absolutizing `url(...)` references inside CSS text.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::resolve::{is_embedded, resolve};

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^"')\s]*))\s*\)"#).unwrap()
});

/// Rewrite every relative `url(...)` in `css` to an absolute URL against `base`.
///
/// Quoting is preserved. Absolute, embedded (`data:`) and fragment-only
/// (`#id`, used by SVG filters) references are left byte-for-byte as they were.
#[must_use]
pub fn absolutize_css_urls(css: &str, base: &str) -> String {
    CSS_URL
        .replace_all(css, |caps: &Captures<'_>| {
            let original = &caps[0];
            let (value, quote) = if let Some(m) = caps.get(1) {
                (m.as_str(), "\"")
            } else if let Some(m) = caps.get(2) {
                (m.as_str(), "'")
            } else {
                (caps.get(3).map_or("", |m| m.as_str()), "")
            };

            if value.is_empty() || value.starts_with('#') || is_embedded(value) {
                return original.to_string();
            }

            let resolved = resolve(value, base);
            if resolved == value {
                original.to_string()
            } else {
                format!("url({quote}{resolved}{quote})")
            }
        })
        .into_owned()
}
