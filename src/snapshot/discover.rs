//! Discovery of sub-resources referenced by a page.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::resolve::{is_embedded, resolve};

/// Category of a referenced sub-resource. Each category is fetched as one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Stylesheet,
    Media,
    Script,
    Icon,
}

impl ResourceKind {
    /// Whether resources of this kind are fetched as opaque bytes.
    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Media | Self::Icon)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Stylesheet => "stylesheet",
            Self::Media => "media",
            Self::Script => "script",
            Self::Icon => "icon",
        }
    }
}

/// One (element, attribute, URL) reference found in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    pub kind: ResourceKind,
    pub element: String,
    pub attribute: String,
    pub original: String,
    pub resolved: String,
}

/// All fetchable references in a page, plus the base they were resolved against.
#[derive(Debug, Clone, Default)]
pub struct PageScan {
    pub base: String,
    pub references: Vec<ResourceReference>,
}

impl PageScan {
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceReference> {
        self.references.iter().filter(move |r| r.kind == kind)
    }

    /// Distinct resolved URLs for `kind`, in document order.
    #[must_use]
    pub fn unique_urls(&self, kind: ResourceKind) -> Vec<String> {
        let mut seen = HashSet::new();
        self.of_kind(kind)
            .filter(|r| seen.insert(r.resolved.as_str()))
            .map(|r| r.resolved.clone())
            .collect()
    }
}

/// A single `srcset` candidate: URL plus optional width/density descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcsetCandidate {
    pub url: String,
    pub descriptor: String,
}

/// Classify a `link` element by its `rel` tokens.
///
/// Alternate stylesheets are disabled until the reader picks them, so they are
/// not inlined.
#[must_use]
pub fn link_kind(rel: &str) -> Option<ResourceKind> {
    let tokens: Vec<String> = rel
        .split_ascii_whitespace()
        .map(str::to_ascii_lowercase)
        .collect();

    if tokens.iter().any(|t| t == "stylesheet") {
        if tokens.iter().any(|t| t == "alternate") {
            None
        } else {
            Some(ResourceKind::Stylesheet)
        }
    } else if tokens.iter().any(|t| t == "icon" || t == "apple-touch-icon") {
        Some(ResourceKind::Icon)
    } else {
        None
    }
}

/// Split a `srcset` value into candidates. URLs may themselves contain commas.
#[must_use]
pub fn parse_srcset(srcset: &str) -> Vec<SrcsetCandidate> {
    let mut candidates = Vec::new();
    let mut rest = srcset;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let mut url = &rest[..url_end];
        rest = &rest[url_end..];

        let mut descriptor = "";
        if url.ends_with(',') {
            url = url.trim_end_matches(',');
        } else {
            let descriptor_end = rest.find(',').unwrap_or(rest.len());
            descriptor = rest[..descriptor_end].trim();
            rest = &rest[descriptor_end..];
        }

        if !url.is_empty() {
            candidates.push(SrcsetCandidate {
                url: url.to_string(),
                descriptor: descriptor.to_string(),
            });
        }
    }

    candidates
}

/// Serialize candidates back into a `srcset` value.
#[must_use]
pub fn render_srcset(candidates: &[SrcsetCandidate]) -> String {
    candidates
        .iter()
        .map(|c| {
            if c.descriptor.is_empty() {
                c.url.clone()
            } else {
                format!("{} {}", c.url, c.descriptor)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Scan a page for every sub-resource the snapshot pipeline fetches.
///
/// References are resolved against the document's own `<base href>` when it
/// declares one, otherwise against `page_url`. Embedded `data:` references and
/// anything that does not resolve to an http(s) URL are skipped.
#[must_use]
pub fn scan(html: &str, page_url: &str) -> PageScan {
    let document = Html::parse_document(html);
    let base = declared_base(&document, page_url).unwrap_or_else(|| page_url.to_string());

    let mut references = Vec::new();
    let mut record = |kind: ResourceKind, element: &ElementRef<'_>, attribute: &str, value: &str| {
        if let Some(resolved) = fetchable(value, &base) {
            references.push(ResourceReference {
                kind,
                element: element.value().name().to_string(),
                attribute: attribute.to_string(),
                original: value.to_string(),
                resolved,
            });
        }
    };

    for link in select_all(&document, "link[rel][href]") {
        let rel = link.value().attr("rel").unwrap_or_default();
        if let (Some(kind), Some(href)) = (link_kind(rel), link.value().attr("href")) {
            record(kind, &link, "href", href);
        }
    }

    for media in select_all(&document, "img, video, audio, source") {
        if let Some(src) = media.value().attr("src") {
            record(ResourceKind::Media, &media, "src", src);
        }
        if let Some(poster) = media.value().attr("poster") {
            record(ResourceKind::Media, &media, "poster", poster);
        }
        if let Some(srcset) = media.value().attr("srcset") {
            for candidate in parse_srcset(srcset) {
                record(ResourceKind::Media, &media, "srcset", &candidate.url);
            }
        }
    }

    for script in select_all(&document, "script[src]") {
        if let Some(src) = script.value().attr("src") {
            record(ResourceKind::Script, &script, "src", src);
        }
    }

    PageScan { base, references }
}

fn declared_base(document: &Html, page_url: &str) -> Option<String> {
    select_all(document, "base[href]")
        .into_iter()
        .next()
        .and_then(|base| base.value().attr("href"))
        .map(|href| resolve(href, page_url))
        .filter(|resolved| Url::parse(resolved).is_ok())
}

fn fetchable(value: &str, base: &str) -> Option<String> {
    if value.trim().is_empty() || is_embedded(value) {
        return None;
    }
    let resolved = resolve(value, base);
    match Url::parse(&resolved) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(resolved),
        _ => None,
    }
}

fn select_all<'a>(document: &'a Html, selector: &str) -> Vec<ElementRef<'a>> {
    Selector::parse(selector)
        .map(|s| document.select(&s).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://example.com/articles/one.html";

    #[test]
    fn test_link_kind() {
        assert_eq!(link_kind("stylesheet"), Some(ResourceKind::Stylesheet));
        assert_eq!(link_kind("StyleSheet"), Some(ResourceKind::Stylesheet));
        assert_eq!(link_kind("alternate stylesheet"), None);
        assert_eq!(link_kind("Stylesheet ALTERNATE"), None);
        assert_eq!(link_kind("icon"), Some(ResourceKind::Icon));
        assert_eq!(link_kind("shortcut icon"), Some(ResourceKind::Icon));
        assert_eq!(link_kind("apple-touch-icon"), Some(ResourceKind::Icon));
        assert_eq!(link_kind("preload"), None);
        assert_eq!(link_kind("canonical"), None);
    }

    #[test]
    fn test_parse_srcset() {
        let candidates = parse_srcset("a.png 1x, /img/b.png 2x,c.png");
        assert_eq!(
            candidates,
            vec![
                SrcsetCandidate { url: "a.png".into(), descriptor: "1x".into() },
                SrcsetCandidate { url: "/img/b.png".into(), descriptor: "2x".into() },
                SrcsetCandidate { url: "c.png".into(), descriptor: String::new() },
            ]
        );
    }

    #[test]
    fn test_parse_srcset_url_with_commas() {
        let candidates = parse_srcset("https://cdn.example.com/w_100,h_100/a.jpg 100w, small.jpg 50w");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].url, "https://cdn.example.com/w_100,h_100/a.jpg");
        assert_eq!(candidates[0].descriptor, "100w");
        assert_eq!(candidates[1].url, "small.jpg");
    }

    #[test]
    fn test_render_srcset() {
        let candidates = parse_srcset("a.png 1x, b.png");
        assert_eq!(render_srcset(&candidates), "a.png 1x, b.png");
    }

    #[test]
    fn test_scan_collects_every_category() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/a.css">
            <link rel="shortcut icon" href="favicon.ico">
            <link rel="preconnect" href="https://fonts.example.net">
            <script src="app.js"></script>
            <script>inline()</script>
        </head><body>
            <img src="pic.png" srcset="pic-2x.png 2x">
            <img src="data:image/gif;base64,R0lGODlh">
            <video poster="poster.jpg"><source src="clip.mp4"></video>
            <img src="javascript:void(0)">
        </body></html>"#;

        let scan = scan(html, PAGE);
        assert_eq!(scan.base, PAGE);
        assert_eq!(scan.unique_urls(ResourceKind::Stylesheet), vec!["https://example.com/a.css"]);
        assert_eq!(
            scan.unique_urls(ResourceKind::Icon),
            vec!["https://example.com/articles/favicon.ico"]
        );
        assert_eq!(
            scan.unique_urls(ResourceKind::Script),
            vec!["https://example.com/articles/app.js"]
        );
        assert_eq!(
            scan.unique_urls(ResourceKind::Media),
            vec![
                "https://example.com/articles/pic.png",
                "https://example.com/articles/pic-2x.png",
                "https://example.com/articles/poster.jpg",
                "https://example.com/articles/clip.mp4",
            ]
        );
    }

    #[test]
    fn test_scan_honours_declared_base() {
        let html = r#"<html><head><base href="/static/"></head>
            <body><img src="x.png"></body></html>"#;
        let scan = scan(html, PAGE);
        assert_eq!(scan.base, "https://example.com/static/");
        assert_eq!(
            scan.unique_urls(ResourceKind::Media),
            vec!["https://example.com/static/x.png"]
        );
    }

    #[test]
    fn test_scan_skips_alternate_stylesheets() {
        let html = r#"<head>
            <link rel="stylesheet" href="/main.css">
            <link rel="alternate stylesheet" title="Dark" href="/dark.css">
        </head>"#;
        let scan = scan(html, PAGE);
        assert_eq!(
            scan.unique_urls(ResourceKind::Stylesheet),
            vec!["https://example.com/main.css"]
        );
    }

    #[test]
    fn test_scan_decodes_numeric_references() {
        let html = r#"<body><img src="/i.png?a=1&#38;b=2"></body>"#;
        let scan = scan(html, PAGE);
        assert_eq!(
            scan.unique_urls(ResourceKind::Media),
            vec!["https://example.com/i.png?a=1&b=2"]
        );
    }

    #[test]
    fn test_unique_urls_dedupes_but_keeps_references() {
        let html = r#"<body><img src="/a.png"><img src="https://example.com/a.png"></body>"#;
        let scan = scan(html, PAGE);
        assert_eq!(scan.of_kind(ResourceKind::Media).count(), 2);
        assert_eq!(scan.unique_urls(ResourceKind::Media).len(), 1);
    }
}
