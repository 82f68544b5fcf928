use url::Url;

/// Schemes whose references already embed or name their content.
const PASSTHROUGH_SCHEMES: &[&str] = &["data:", "blob:"];

/// Resolve `reference` against `base` to an absolute URL.
///
/// Never fails: embedded-data and blob references, already-absolute URLs and
/// anything that cannot be resolved come back unchanged. Protocol-relative
/// references get `https:`.
#[must_use]
pub fn resolve(reference: &str, base: &str) -> String {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return reference.to_string();
    }

    let lower = trimmed.to_ascii_lowercase();
    if PASSTHROUGH_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return reference.to_string();
    }

    if trimmed.starts_with("//") {
        return format!("https:{trimmed}");
    }

    if Url::parse(trimmed).is_ok() {
        return reference.to_string();
    }

    Url::parse(base)
        .and_then(|b| b.join(trimmed))
        .map_or_else(|_| reference.to_string(), String::from)
}

/// Whether `reference` is already inlined content rather than a location.
#[must_use]
pub fn is_embedded(reference: &str) -> bool {
    reference
        .trim_start()
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
}
