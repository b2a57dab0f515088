//! Article page parsing for backfill.
//!
//! Sitemap URLs arrive without metadata, so the record is rebuilt from the
//! article HTML. The selectors follow the usual WordPress theme markup with
//! generic fallbacks.

use scraper::{Html, Selector};

use super::parser::element_text;
use crate::storage::{ArticleRecord, RecordError, RecordOrigin};
use crate::util::normalize_link;

/// Content containers tried in order.
const CONTENT_SELECTORS: &[&str] = &[".entry-content", ".post-content", "article", ".content"];

/// Build a validated record from an article page.
///
/// - title: `og:title`, then `h1.entry-title`, then `<title>`
/// - guid: the `rel="shortlink"` href, else the normalized URL
/// - pub_date: `article:published_time`, else the first `time[datetime]`
/// - creator: `meta[name=author]`, else `a[rel=author]`
/// - categories: `a[rel~=category]` links, else `article:section`
/// - description: `og:description`, else `meta[name=description]`
/// - content: text of the first matching content container
pub fn parse_article_page(url: &str, html: &str) -> Result<ArticleRecord, RecordError> {
    let document = Html::parse_document(html);

    let title = meta_property(&document, "og:title")
        .or_else(|| first_text(&document, "h1.entry-title"))
        .or_else(|| first_text(&document, "title"))
        .unwrap_or_default();

    let guid = first_attr(&document, r#"link[rel="shortlink"]"#, "href")
        .unwrap_or_else(|| normalize_link(url));

    let pub_date = meta_property(&document, "article:published_time")
        .or_else(|| first_attr(&document, "time[datetime]", "datetime"))
        .and_then(|raw| parse_timestamp(&raw));

    let creator = meta_name(&document, "author").or_else(|| first_text(&document, r#"a[rel="author"]"#));

    let mut categories = all_text(&document, r#"a[rel~="category"]"#);
    if categories.is_empty() {
        categories.extend(meta_property(&document, "article:section"));
    }

    let description =
        meta_property(&document, "og:description").or_else(|| meta_name(&document, "description"));

    let content = CONTENT_SELECTORS
        .iter()
        .find_map(|sel| first_element_text(&document, sel));

    ArticleRecord {
        guid,
        link: url.to_string(),
        title,
        pub_date,
        description,
        content,
        comments_link: None,
        creator,
        categories,
        origin: RecordOrigin::Backfill,
    }
    .validate()
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            tracing::warn!(selector = css, error = ?e, "Invalid CSS selector");
            None
        }
    }
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

fn meta_property(document: &Html, property: &str) -> Option<String> {
    first_attr(document, &format!(r#"meta[property="{property}"]"#), "content")
}

fn meta_name(document: &Html, name: &str) -> Option<String> {
    first_attr(document, &format!(r#"meta[name="{name}"]"#), "content")
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    all_text(document, css).into_iter().next()
}

fn all_text(document: &Html, css: &str) -> Vec<String> {
    let Some(sel) = selector(css) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

fn first_element_text(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    let element = document.select(&sel).next()?;
    let text = element_text(element);
    (!text.is_empty()).then_some(text)
}

/// RFC 3339 (`2024-01-01T10:00:00+08:00`), or a bare date taken as UTC midnight.
fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}
