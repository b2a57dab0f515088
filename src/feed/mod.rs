//! Discovery sources and the fetch-and-parse collaborator.
//!
//! - [`parser`] - RSS/Atom feeds into [`ArticleRecord`](crate::storage::ArticleRecord)s via `feed-rs`
//! - [`sitemap`] - `<urlset>` and `<sitemapindex>` documents via `quick-xml`
//! - [`page`] - article HTML into a record via `scraper`, for backfill
//! - [`fetcher`] - HTTP with retry, size limits and feed paging
//!
//! # Example
//!
//! ```ignore
//! use press_ingest::feed::HttpFetcher;
//!
//! let http = HttpFetcher::new(&config)?;
//! let records = http.fetch_feed_pages(&config.feed_url, 50, delay).await?;
//! let urls = http.fetch_sitemap(&config.sitemap_url, delay).await?;
//! ```

pub mod fetcher;
pub mod page;
pub mod parser;
pub mod sitemap;

pub use fetcher::{FetchError, HttpFetcher};
pub use page::parse_article_page;
pub use parser::{clean_html, parse_feed, ParseResult};
pub use sitemap::{parse_sitemap, Sitemap, SitemapError};
