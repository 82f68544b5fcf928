//! Rewriting the fetched document so it no longer depends on its origin.
//!
//! Every handler only touches the element it was handed, so one streaming
//! pass applies all of the batch results.

use std::borrow::Cow;
use std::cell::Cell;
use std::collections::HashMap;

use lol_html::errors::RewritingError;
use lol_html::html_content::{ContentType, Element};
use lol_html::{element, rewrite_str, text, RewriteStrSettings};

use super::css::absolutize_css_urls;
use super::discover::{link_kind, parse_srcset, render_srcset, ResourceKind};
use super::resolve::{is_embedded, resolve};
use crate::constants::IFRAME_SANDBOX;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const MEDIA_TAGS: &[&str] = &["img", "video", "audio", "source"];

/// Attributes a `<link rel=stylesheet>` hands on to its inline `<style>`.
const STYLE_CARRIED_ATTRS: &[&str] = &["media", "id", "nonce", "title"];

/// Attributes that stop making sense once a script is inline.
const SCRIPT_DROPPED_ATTRS: &[&str] = &["src", "integrity", "crossorigin"];

/// Fetched content keyed by resolved URL.
#[derive(Debug, Clone, Default)]
pub struct Inlined {
    /// Stylesheet text, with `url()` references already absolutized.
    pub stylesheets: HashMap<String, String>,
    /// Script source.
    pub scripts: HashMap<String, String>,
    /// `data:` URIs for media and icons.
    pub binaries: HashMap<String, String>,
}

/// Apply inlined content, absolutize the remaining references, and inject
/// `<base href="{base}">` as the first child of `<head>`.
///
/// # Errors
///
/// Returns an error if the rewriter rejects the document.
pub fn rewrite(html: &str, base: &str, inlined: &Inlined) -> Result<String, RewritingError> {
    let base_tag = format!("<base href=\"{}\">", quote_attr(base));
    let head_seen = Cell::new(false);
    let mut style_text = String::new();

    let mut handlers = vec![
        element!("[style]", |el| {
            if let Some(style) = el.get_attribute("style") {
                let rewritten = absolutize_css_urls(&style, base);
                if rewritten != style {
                    el.set_attribute("style", &rewritten)?;
                }
            }
            Ok(())
        }),
        text!("style", |chunk| {
            style_text.push_str(chunk.as_str());
            if chunk.last_in_text_node() {
                let rewritten = absolutize_css_urls(&style_text, base);
                chunk.replace(&rewritten, ContentType::Html);
                style_text.clear();
            } else {
                chunk.remove();
            }
            Ok(())
        }),
        element!("meta[charset]", |el| {
            el.set_attribute("charset", "UTF-8")?;
            Ok(())
        }),
        element!("meta[http-equiv]", |el| {
            let is_content_type = el
                .get_attribute("http-equiv")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("content-type"));
            if is_content_type {
                el.set_attribute("content", "text/html; charset=UTF-8")?;
            }
            Ok(())
        }),
        element!("link[rel][href]", |el| rewrite_link(el, base, inlined)),
        element!("script[src]", |el| rewrite_script(el, base, &inlined.scripts)),
        element!("iframe", |el| {
            el.set_attribute("sandbox", IFRAME_SANDBOX)?;
            if let Some(src) = el.get_attribute("src") {
                let resolved = resolve(&decode_entities(&src), base);
                if resolved != src {
                    el.set_attribute("src", &resolved)?;
                }
            }
            Ok(())
        }),
        element!("base", |el| {
            if el.has_attribute("target") {
                el.remove_attribute("href");
            } else {
                el.remove();
            }
            Ok(())
        }),
        element!("head", |el| {
            if !head_seen.get() {
                el.prepend(&base_tag, ContentType::Html);
                head_seen.set(true);
            }
            Ok(())
        }),
    ];

    for &tag in MEDIA_TAGS {
        handlers.push(element!(tag, |el| rewrite_media(el, base, &inlined.binaries)));
    }

    let output = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )?;

    if head_seen.get() {
        Ok(output)
    } else {
        insert_head(&output, &base_tag)
    }
}

/// Give a document that has no `<head>` one holding `base_tag`: inside `<html>`
/// when present, otherwise before the first element and never ahead of the
/// doctype.
fn insert_head(html: &str, base_tag: &str) -> Result<String, RewritingError> {
    let head = format!("<head>{base_tag}</head>");
    let placed = Cell::new(false);

    let output = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("*", |el| {
                if !placed.get() {
                    if el.tag_name() == "html" {
                        el.prepend(&head, ContentType::Html);
                    } else {
                        el.before(&head, ContentType::Html);
                    }
                    placed.set(true);
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?;

    if placed.get() {
        Ok(output)
    } else {
        Ok(after_doctype(&output, &head))
    }
}

/// Insert `content` right after a leading doctype, or at the start.
fn after_doctype(html: &str, content: &str) -> String {
    let offset = html.len() - html.trim_start().len();
    let rest = &html[offset..];
    let is_doctype = rest
        .get(..9)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("<!doctype"));

    match rest.find('>') {
        Some(end) if is_doctype => {
            let split = offset + end + 1;
            format!("{}{content}{}", &html[..split], &html[split..])
        }
        _ => format!("{content}{html}"),
    }
}

fn rewrite_link(el: &mut Element<'_, '_>, base: &str, inlined: &Inlined) -> HandlerResult {
    let (Some(rel), Some(href)) = (el.get_attribute("rel"), el.get_attribute("href")) else {
        return Ok(());
    };
    let resolved = resolve(&decode_entities(&href), base);

    match link_kind(&rel) {
        Some(ResourceKind::Stylesheet) => {
            if let Some(css) = inlined.stylesheets.get(&resolved) {
                let style = style_element(el, css);
                el.replace(&style, ContentType::Html);
            }
        }
        Some(ResourceKind::Icon) => {
            if !is_embedded(&href) {
                let value = inlined.binaries.get(&resolved).unwrap_or(&resolved);
                el.set_attribute("href", value)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn rewrite_script(
    el: &mut Element<'_, '_>,
    base: &str,
    scripts: &HashMap<String, String>,
) -> HandlerResult {
    if let Some(src) = el.get_attribute("src") {
        let resolved = resolve(&decode_entities(&src), base);
        if let Some(source) = scripts.get(&resolved) {
            let script = script_element(el, source);
            el.replace(&script, ContentType::Html);
        }
    }
    Ok(())
}

fn rewrite_media(
    el: &mut Element<'_, '_>,
    base: &str,
    binaries: &HashMap<String, String>,
) -> HandlerResult {
    for attribute in ["src", "poster"] {
        if let Some(value) = el.get_attribute(attribute) {
            let replacement = inline_or_absolute(&value, base, binaries);
            if replacement != value {
                el.set_attribute(attribute, &replacement)?;
            }
        }
    }

    if let Some(srcset) = el.get_attribute("srcset") {
        let mut candidates = parse_srcset(&srcset);
        for candidate in &mut candidates {
            candidate.url = inline_or_absolute(&candidate.url, base, binaries);
        }
        let rewritten = render_srcset(&candidates);
        if rewritten != srcset {
            el.set_attribute("srcset", &rewritten)?;
        }
    }
    Ok(())
}

/// The `data:` URI for a fetched reference, or its absolute URL when the
/// fetch did not succeed.
fn inline_or_absolute(value: &str, base: &str, binaries: &HashMap<String, String>) -> String {
    if value.trim().is_empty() || is_embedded(value) {
        return value.to_string();
    }
    let resolved = resolve(&decode_entities(value), base);
    binaries.get(&resolved).cloned().unwrap_or(resolved)
}

fn style_element(link: &Element<'_, '_>, css: &str) -> String {
    let mut tag = String::from("<style");
    for name in STYLE_CARRIED_ATTRS {
        if let Some(value) = link.get_attribute(name) {
            push_attr(&mut tag, name, &value);
        }
    }
    tag.push('>');
    tag.push_str(&escape_raw_text(css, "style"));
    tag.push_str("</style>");
    tag
}

fn script_element(script: &Element<'_, '_>, source: &str) -> String {
    let mut tag = String::from("<script");
    for attr in script.attributes() {
        let name = attr.name();
        if SCRIPT_DROPPED_ATTRS.contains(&name.as_str()) {
            continue;
        }
        push_attr(&mut tag, &name, &attr.value());
    }
    tag.push('>');
    tag.push_str(&escape_raw_text(source, "script"));
    tag.push_str("</script>");
    tag
}

fn push_attr(tag: &mut String, name: &str, value: &str) {
    tag.push(' ');
    tag.push_str(name);
    tag.push_str("=\"");
    tag.push_str(&quote_attr(value));
    tag.push('"');
}

fn quote_attr(value: &str) -> Cow<'_, str> {
    if value.contains('"') {
        Cow::Owned(value.replace('"', "&quot;"))
    } else {
        Cow::Borrowed(value)
    }
}

/// Keep fetched text from closing its raw-text element early.
fn escape_raw_text<'a>(content: &'a str, tag: &str) -> Cow<'a, str> {
    let needle = format!("</{tag}");
    if !content.to_ascii_lowercase().contains(&needle) {
        return Cow::Borrowed(content);
    }

    let mut escaped = String::with_capacity(content.len() + 8);
    let mut rest = content;
    while let Some(pos) = rest.to_ascii_lowercase().find(&needle) {
        escaped.push_str(&rest[..pos]);
        escaped.push_str("<\\/");
        escaped.push_str(&rest[pos + 2..pos + needle.len()]);
        rest = &rest[pos + needle.len()..];
    }
    escaped.push_str(rest);
    Cow::Owned(escaped)
}

/// Decode character references in a raw attribute value, so lookups use the
/// same keys discovery produced from the parsed document.
fn decode_entities(value: &str) -> Cow<'_, str> {
    html_escape::decode_html_entities(value)
}
