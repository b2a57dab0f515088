use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;

use super::page::parse_article_page;
use super::parser::{parse_feed, ParseResult};
use super::sitemap::{parse_sitemap, Sitemap, MAX_CHILD_SITEMAPS};
use crate::config::Config;
use crate::storage::ArticleRecord;
use crate::sync::{ArticleFetcher, RetryPolicy};

const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a feed page, sitemap or article.
///
/// All of them are scoped to one URL; callers record and skip.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// The body could not be turned into a feed, sitemap or valid record
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// HTTP side of ingestion: feed pages, sitemaps and article pages.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(client, config.request_timeout(), config.retry_policy()))
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            timeout,
            retry,
        }
    }

    /// GET `url` and return the body.
    ///
    /// 429 and 5xx responses, as well as truncated bodies, are retried with
    /// the configured backoff; other 4xx statuses fail immediately.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(|e| if e.is_timeout() { FetchError::Timeout } else { FetchError::Network(e) })?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= self.retry.max_retries {
                    return Err(FetchError::RateLimited(self.retry.max_retries));
                }

                let delay = self.retry.delay_for(retry_count);
                tracing::warn!(
                    url = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= self.retry.max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }

                let delay = self.retry.delay_for(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, MAX_BODY_SIZE).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= self.retry.max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }

                    let delay = self.retry.delay_for(retry_count);
                    tracing::debug!(
                        url = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch and parse one feed document.
    pub async fn fetch_feed(&self, url: &str) -> Result<ParseResult, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        let result = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
        if result.skipped > 0 {
            tracing::warn!(url = %url, skipped = result.skipped, "Feed entries without a usable link skipped");
        }
        Ok(result)
    }

    /// Fetch the feed and its older pages (`?paged=2..=max_pages`).
    ///
    /// The first page must succeed. Paging stops at the first older page that
    /// is empty or fails; `delay` is slept before each older page.
    pub async fn fetch_feed_pages(
        &self,
        feed_url: &str,
        max_pages: u32,
        delay: Duration,
    ) -> Result<Vec<ArticleRecord>, FetchError> {
        let mut records = self.fetch_feed(feed_url).await?.records;
        tracing::info!(url = %feed_url, records = records.len(), "Fetched feed");

        for page in 2..=max_pages {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let url = paged_url(feed_url, page);
            match self.fetch_feed(&url).await {
                Ok(result) if result.records.is_empty() => {
                    tracing::info!(page = page, "Feed page empty, stopping");
                    break;
                }
                Ok(result) => {
                    tracing::debug!(page = page, records = result.records.len(), "Fetched feed page");
                    records.extend(result.records);
                }
                Err(e) => {
                    tracing::info!(page = page, error = %e, "Feed page unavailable, stopping");
                    break;
                }
            }
        }

        Ok(records)
    }

    /// Every article URL listed by `url`, following a sitemap index one level.
    ///
    /// A failing child sitemap is logged and skipped. `delay` is slept
    /// between consecutive child fetches.
    pub async fn fetch_sitemap(&self, url: &str, delay: Duration) -> Result<Vec<String>, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        let children = match parse_sitemap(&bytes).map_err(|e| FetchError::Parse(e.to_string()))? {
            Sitemap::Urls(urls) => {
                tracing::info!(url = %url, urls = urls.len(), "Fetched sitemap");
                return Ok(urls);
            }
            Sitemap::Index(children) => children,
        };

        if children.len() > MAX_CHILD_SITEMAPS {
            tracing::warn!(
                url = %url,
                children = children.len(),
                limit = MAX_CHILD_SITEMAPS,
                "Sitemap index truncated"
            );
        }

        let mut urls = Vec::new();
        for (i, child) in children.iter().take(MAX_CHILD_SITEMAPS).enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let parsed = match self.fetch_bytes(child).await {
                Ok(bytes) => parse_sitemap(&bytes).map_err(|e| FetchError::Parse(e.to_string())),
                Err(e) => Err(e),
            };
            match parsed {
                Ok(Sitemap::Urls(child_urls)) => urls.extend(child_urls),
                Ok(Sitemap::Index(_)) => {
                    tracing::warn!(url = %child, "Nested sitemap index ignored");
                }
                Err(e) => {
                    tracing::warn!(url = %child, error = %e, "Child sitemap failed, skipping");
                }
            }
        }

        tracing::info!(url = %url, urls = urls.len(), "Fetched sitemap index");
        Ok(urls)
    }
}

#[async_trait]
impl ArticleFetcher for HttpFetcher {
    async fn fetch_article(&self, url: &str) -> Result<ArticleRecord, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        let html = String::from_utf8_lossy(&bytes);
        parse_article_page(url, &html).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

/// `feed_url` with `paged=N` added to its query.
fn paged_url(feed_url: &str, page: u32) -> String {
    match url::Url::parse(feed_url) {
        Ok(mut u) => {
            u.query_pairs_mut().append_pair("paged", &page.to_string());
            u.to_string()
        }
        Err(_) => format!("{feed_url}?paged={page}"),
    }
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // A dropped connection mid-body leaves fewer bytes than Content-Length.
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{any, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::with_client(reqwest::Client::new(), Duration::from_secs(5), RetryPolicy::immediate(3))
    }

    fn rss(items: &[(&str, &str)]) -> String {
        let body: String = items
            .iter()
            .map(|(guid, link)| {
                format!("<item><title>{guid}</title><link>{link}</link><guid>{guid}</guid></item>")
            })
            .collect();
        format!(r#"<?xml version="1.0"?><rss version="2.0"><channel>{body}</channel></rss>"#)
    }

    #[test]
    fn test_paged_url() {
        assert_eq!(paged_url("https://x.com/feed/", 2), "https://x.com/feed/?paged=2");
        assert_eq!(
            paged_url("https://x.com/?feed=rss2", 3),
            "https://x.com/?feed=rss2&paged=3"
        );
    }

    #[tokio::test]
    async fn test_fetch_404_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_bytes(&format!("{}/a", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_fetch_500_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_bytes(&format!("{}/a", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_fetch_503_then_success() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let bytes = fetcher()
            .fetch_bytes(&format!("{}/a", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, b"ok");
    }

    #[tokio::test]
    async fn test_fetch_429_gives_up() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_bytes(&format!("{}/a", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::RateLimited(3)));
    }

    #[tokio::test]
    async fn test_feed_pages_stop_at_first_empty_page() {
        let server = MockServer::start().await;
        Mock::given(path("/feed/"))
            .and(query_param("paged", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[("g2", "https://x.com/b")])))
            .mount(&server)
            .await;
        Mock::given(path("/feed/"))
            .and(query_param("paged", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[])))
            .mount(&server)
            .await;
        Mock::given(path("/feed/"))
            .and(query_param("paged", "4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[("g4", "https://x.com/d")])))
            .expect(0)
            .mount(&server)
            .await;
        // Lowest priority: the unpaged first page
        Mock::given(path("/feed/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[("g1", "https://x.com/a")])))
            .mount(&server)
            .await;

        let records = fetcher()
            .fetch_feed_pages(&format!("{}/feed/", server.uri()), 50, Duration::ZERO)
            .await
            .unwrap();
        let guids: Vec<&str> = records.iter().map(|r| r.guid.as_str()).collect();
        assert_eq!(guids, vec!["g1", "g2"]);
    }

    #[tokio::test]
    async fn test_feed_first_page_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = fetcher()
            .fetch_feed_pages(&format!("{}/feed/", server.uri()), 5, Duration::ZERO)
            .await;
        assert!(matches!(result, Err(FetchError::HttpStatus(404))));
    }

    #[tokio::test]
    async fn test_sitemap_index_followed_one_level() {
        let server = MockServer::start().await;
        let index = format!(
            r#"<sitemapindex><sitemap><loc>{0}/s1.xml</loc></sitemap><sitemap><loc>{0}/broken.xml</loc></sitemap><sitemap><loc>{0}/s2.xml</loc></sitemap></sitemapindex>"#,
            server.uri()
        );
        Mock::given(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(path("/s1.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<urlset><url><loc>https://x.com/a</loc></url></urlset>",
            ))
            .mount(&server)
            .await;
        Mock::given(path("/broken.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/s2.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<urlset><url><loc>https://x.com/b</loc></url><url><loc>https://x.com/c</loc></url></urlset>",
            ))
            .mount(&server)
            .await;

        let urls = fetcher()
            .fetch_sitemap(&format!("{}/sitemap.xml", server.uri()), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(urls, vec!["https://x.com/a", "https://x.com/b", "https://x.com/c"]);
    }

    #[tokio::test]
    async fn test_sitemap_children_are_paced() {
        let server = MockServer::start().await;
        let index = format!(
            r#"<sitemapindex><sitemap><loc>{0}/s1.xml</loc></sitemap><sitemap><loc>{0}/s2.xml</loc></sitemap><sitemap><loc>{0}/s3.xml</loc></sitemap></sitemapindex>"#,
            server.uri()
        );
        Mock::given(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<urlset><url><loc>https://x.com/a</loc></url></urlset>",
            ))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let urls = fetcher()
            .fetch_sitemap(&format!("{}/sitemap.xml", server.uri()), Duration::from_millis(60))
            .await
            .unwrap();

        assert_eq!(urls.len(), 3);
        // Two gaps between three children, none before the first
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_fetch_article_parses_page() {
        let server = MockServer::start().await;
        Mock::given(path("/2024/01/post/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><head><meta property="og:title" content="Post"></head>
<body><div class="entry-content">Hello</div></body></html>"#,
            ))
            .mount(&server)
            .await;

        let url = format!("{}/2024/01/post/", server.uri());
        let record = fetcher().fetch_article(&url).await.unwrap();
        assert_eq!(record.title, "Post");
        assert_eq!(record.link, format!("{}/2024/01/post", server.uri()));
        assert_eq!(record.content.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_fetch_article_invalid_url() {
        let err = fetcher().fetch_article("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }
}
