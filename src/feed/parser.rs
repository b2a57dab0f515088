use std::collections::HashMap;

use anyhow::Result;
use feed_rs::parser;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{ElementRef, Html};
use sha2::{Digest, Sha256};

use crate::storage::{ArticleRecord, RecordOrigin};
use crate::util::{collapse_whitespace, normalize_link};

/// Elements whose text never belongs in an article body.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "iframe", "noscript"];

/// Validated records from one feed document.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub records: Vec<ArticleRecord>,
    /// Entries dropped because they had no usable link
    pub skipped: usize,
}

/// Parse an RSS/Atom document into article records.
///
/// Every record has passed [`ArticleRecord::validate`]; entries that fail are
/// counted in `skipped`. Descriptions and content are reduced to plain text.
pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult> {
    let feed = parser::parse(bytes)?;
    let mut extras = rss_item_extras(bytes);

    let mut result = ParseResult::default();
    for entry in feed.entries {
        let link = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
            .or_else(|| entry.links.first())
            .map(|l| l.href.clone());
        let Some(link) = link else {
            result.skipped += 1;
            continue;
        };

        let pub_date = entry.published.or(entry.updated).map(|dt| dt.timestamp());
        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());

        let existing_id = if entry.id.is_empty() {
            None
        } else {
            Some(entry.id.as_str())
        };
        let guid = generate_guid(existing_id, Some(&link), &title, pub_date);

        let item = extras.remove(&normalize_link(&link)).unwrap_or_default();
        let comments_link = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("replies"))
            .map(|l| l.href.clone())
            .or(item.comments);
        let creator = entry
            .authors
            .into_iter()
            .map(|p| p.name)
            .find(|n| !n.trim().is_empty())
            .or(item.creator);

        let record = ArticleRecord {
            guid,
            link,
            title,
            pub_date,
            description: entry.summary.map(|s| clean_html(&s.content)),
            content: entry.content.and_then(|c| c.body).map(|b| clean_html(&b)),
            comments_link,
            creator,
            categories: entry.categories.into_iter().map(|c| c.term).collect(),
            origin: RecordOrigin::Feed,
        };

        match record.validate() {
            Ok(record) => result.records.push(record),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping feed entry");
                result.skipped += 1;
            }
        }
    }

    Ok(result)
}

fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

/// Per-item RSS fields the feed model does not carry reliably.
#[derive(Debug, Default)]
struct ItemExtras {
    comments: Option<String>,
    creator: Option<String>,
}

/// `<comments>` and `dc:creator` of each RSS item, keyed by normalized link.
///
/// Malformed input just yields what was read so far; the feed parser has
/// already judged the document.
fn rss_item_extras(bytes: &[u8]) -> HashMap<String, ItemExtras> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut map = HashMap::new();
    let mut buf = Vec::new();
    let mut in_item = false;
    let mut field: Option<&'static str> = None;
    let mut link: Option<String> = None;
    let mut extras = ItemExtras::default();

    loop {
        let text = match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                field = match e.local_name().as_ref() {
                    b"item" => {
                        in_item = true;
                        link = None;
                        extras = ItemExtras::default();
                        None
                    }
                    b"link" if in_item => Some("link"),
                    b"comments" if in_item => Some("comments"),
                    b"creator" if in_item => Some("creator"),
                    _ => None,
                };
                None
            }
            Ok(Event::Text(t)) => t.unescape().ok().map(|t| t.trim().to_string()),
            Ok(Event::CData(t)) => Some(String::from_utf8_lossy(&t).trim().to_string()),
            Ok(Event::End(e)) => {
                field = None;
                if e.local_name().as_ref() == b"item" {
                    in_item = false;
                    if let Some(l) = link.take() {
                        map.insert(normalize_link(&l), std::mem::take(&mut extras));
                    }
                }
                None
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => None,
        };

        if let (Some(name), Some(value)) = (field, text.filter(|v| !v.is_empty())) {
            match name {
                "link" => link = Some(value),
                "comments" => extras.comments = Some(value),
                _ => extras.creator = Some(value),
            }
        }
        buf.clear();
    }

    map
}

/// Reduce an HTML fragment to its visible text.
///
/// Script, style and iframe contents are dropped and whitespace is collapsed.
/// Plain text passes through with only whitespace collapsed.
pub fn clean_html(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return collapse_whitespace(html).into_owned();
    }
    let fragment = Html::parse_fragment(html);
    element_text(fragment.root_element())
}

/// Visible text under `element`, whitespace collapsed.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        let Some(chunk) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            text.push_str(chunk);
        }
    }
    collapse_whitespace(&text).into_owned()
}
