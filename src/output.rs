//! Persisting a cloned page.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Write `html` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub async fn save_snapshot(html: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }

    tokio::fs::write(path, html)
        .await
        .with_context(|| format!("Failed to write cloned page: {}", path.display()))?;

    debug!(path = %path.display(), bytes = html.len(), "Cloned page written");
    Ok(())
}
