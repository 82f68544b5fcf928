//! Snapshot assembler: turns a URL into one self-contained HTML document.
//!
//! The root document is fetched through the fetch layer, scanned for
//! stylesheets, media, scripts and icons, and each category is fetched as a
//! batch that settles independently: one failed resource never aborts its
//! siblings. The results are then applied to the document in a single
//! rewriting pass.

use std::collections::HashMap;
use std::future::Future;

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::fetch::{BinaryResource, FetchError, Fetcher, ResourceFetcher};

pub mod css;
pub mod discover;
pub mod resolve;
pub mod rewrite;

pub use discover::{scan, PageScan, ResourceKind, ResourceReference};
pub use resolve::resolve;
pub use rewrite::Inlined;

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Failed to clone webpage: {reason}")]
    Parse { reason: String },
}

/// Clones pages using a [`ResourceFetcher`].
#[derive(Debug, Clone)]
pub struct Snapshotter<F> {
    fetcher: F,
    max_concurrent_fetches: Option<usize>,
}

impl<F: ResourceFetcher> Snapshotter<F> {
    #[must_use]
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            max_concurrent_fetches: None,
        }
    }

    /// Cap the number of fetches in flight within a batch. `None` dispatches
    /// the whole batch at once.
    #[must_use]
    pub fn with_max_concurrent_fetches(mut self, cap: Option<usize>) -> Self {
        self.max_concurrent_fetches = cap.filter(|&n| n > 0);
        self
    }

    #[must_use]
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Clone the page at `url` into a single HTML string.
    ///
    /// # Errors
    ///
    /// Fails if `url` is not an absolute http(s) URL, if the root document
    /// cannot be retrieved through any route, or if it cannot be parsed.
    /// Sub-resource failures only leave the original reference in place.
    pub async fn snapshot(&self, url: &str) -> Result<String, CloneError> {
        let url = url.trim();
        validate_target(url)?;
        info!(url = %url, "Cloning page");

        let html = self.fetcher.fetch_text(url).await?;
        if html.trim().is_empty() {
            return Err(CloneError::Parse {
                reason: "root document is empty".to_string(),
            });
        }

        let page = scan(&html, url);
        debug!(
            url = %url,
            base = %page.base,
            references = page.references.len(),
            "Scanned root document"
        );

        let mut inlined = Inlined {
            stylesheets: self.fetch_texts(&page, ResourceKind::Stylesheet).await,
            ..Inlined::default()
        };
        inlined.binaries = self.fetch_binaries(&page, ResourceKind::Media).await;
        inlined.scripts = self.fetch_texts(&page, ResourceKind::Script).await;
        inlined
            .binaries
            .extend(self.fetch_binaries(&page, ResourceKind::Icon).await);

        let output =
            rewrite::rewrite(&html, &page.base, &inlined).map_err(|e| CloneError::Parse {
                reason: e.to_string(),
            })?;

        info!(url = %url, bytes = output.len(), "Page cloned");
        Ok(output)
    }

    /// Fetch every distinct text resource of `kind`. Stylesheets have their
    /// own `url()` references absolutized against the stylesheet URL.
    async fn fetch_texts(&self, page: &PageScan, kind: ResourceKind) -> HashMap<String, String> {
        let urls = page.unique_urls(kind);
        let total = urls.len();
        let fetcher = &self.fetcher;
        let results = self
            .settle(urls, |url| async move {
                let result = fetcher.fetch_text(&url).await;
                (url, result)
            })
            .await;

        let mut fetched = HashMap::with_capacity(total);
        for (url, result) in results {
            match result {
                Ok(text) => {
                    let text = if kind == ResourceKind::Stylesheet {
                        css::absolutize_css_urls(&text, &url)
                    } else {
                        text
                    };
                    fetched.insert(url, text);
                }
                Err(e) => {
                    warn!(kind = kind.label(), url = %url, error = %e, "Keeping original reference");
                }
            }
        }

        log_batch(kind, fetched.len(), total);
        fetched
    }

    /// Fetch every distinct binary resource of `kind` as a `data:` URI.
    async fn fetch_binaries(&self, page: &PageScan, kind: ResourceKind) -> HashMap<String, String> {
        let urls = page.unique_urls(kind);
        let total = urls.len();
        let fetcher = &self.fetcher;
        let results = self
            .settle(urls, |url| async move {
                let result = fetcher.fetch_binary(&url).await;
                (url, result)
            })
            .await;

        let mut fetched = HashMap::with_capacity(total);
        for (url, result) in results {
            match result {
                BinaryResource::Fetched(blob) => {
                    fetched.insert(url, blob.to_data_uri());
                }
                BinaryResource::Unavailable { attempted } => {
                    warn!(
                        kind = kind.label(),
                        url = %url,
                        relays_tried = attempted.len(),
                        "Resource unavailable, keeping absolute URL"
                    );
                }
            }
        }

        log_batch(kind, fetched.len(), total);
        fetched
    }

    /// Run one task per URL and wait for all of them, whatever their outcome.
    async fn settle<T, Op, Fut>(&self, urls: Vec<String>, op: Op) -> Vec<T>
    where
        Op: Fn(String) -> Fut,
        Fut: Future<Output = T>,
    {
        let tasks = urls.into_iter().map(op);
        match self.max_concurrent_fetches {
            Some(cap) => stream::iter(tasks).buffer_unordered(cap).collect().await,
            None => join_all(tasks).await,
        }
    }
}

fn log_batch(kind: ResourceKind, inlined: usize, total: usize) {
    if total > 0 {
        info!(
            kind = kind.label(),
            inlined,
            kept = total - inlined,
            binary = kind.is_binary(),
            "Batch settled"
        );
    }
}

fn validate_target(url: &str) -> Result<Url, CloneError> {
    let parsed = Url::parse(url.trim()).map_err(|e| CloneError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CloneError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(parsed)
}

/// Clone `url` with the given configuration.
///
/// # Errors
///
/// See [`Snapshotter::snapshot`]. Also fails if the HTTP client cannot be built.
pub async fn clone_page_with(config: &Config, url: &str) -> Result<String, CloneError> {
    let fetcher = Fetcher::new(config)?;
    Snapshotter::new(fetcher)
        .with_max_concurrent_fetches(config.max_concurrent_fetches)
        .snapshot(url)
        .await
}

/// Clone `url` with the default relays and retry policy.
///
/// # Errors
///
/// See [`Snapshotter::snapshot`].
pub async fn clone_page(url: &str) -> Result<String, CloneError> {
    clone_page_with(&Config::default(), url).await
}
