use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Child sitemaps followed from one sitemap index.
pub const MAX_CHILD_SITEMAPS: usize = 200;

#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("Invalid sitemap XML: {0}")]
    XmlParse(String),
    #[error("Document is neither a <urlset> nor a <sitemapindex>")]
    UnknownRoot,
}

/// What a sitemap document lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sitemap {
    /// `<urlset>`: article URLs
    Urls(Vec<String>),
    /// `<sitemapindex>`: further sitemap documents
    Index(Vec<String>),
}

/// Parse a sitemap or sitemap index, collecting every `<loc>` in order.
///
/// Entity references are resolved by quick-xml's predefined-entity escape
/// layer only, so DOCTYPE-declared entities are rejected.
pub fn parse_sitemap(bytes: &[u8]) -> Result<Sitemap, SitemapError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut root: Option<bool> = None; // Some(true) = index
    let mut in_loc = false;
    let mut locs = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"urlset" if root.is_none() => root = Some(false),
                b"sitemapindex" if root.is_none() => root = Some(true),
                b"loc" => in_loc = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_loc => {
                let text = t
                    .unescape()
                    .map_err(|e| SitemapError::XmlParse(e.to_string()))?;
                push_loc(&mut locs, &text);
            }
            Ok(Event::CData(t)) if in_loc => {
                push_loc(&mut locs, &String::from_utf8_lossy(&t));
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(SitemapError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    match root {
        Some(true) => Ok(Sitemap::Index(locs)),
        Some(false) => Ok(Sitemap::Urls(locs)),
        None => Err(SitemapError::UnknownRoot),
    }
}

fn push_loc(locs: &mut Vec<String>, text: &str) {
    let loc = text.trim();
    if !loc.is_empty() {
        locs.push(loc.to_string());
    }
}
