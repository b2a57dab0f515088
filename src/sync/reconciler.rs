use std::collections::HashSet;

use super::checker::{ExistenceCheck, ExistenceChecker, LinkLookup};
use super::report::ProgressSink;
use crate::util::normalize_link;

/// Outcome of reconciling the feed and sitemap URL supplies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Non-blank URLs received from the feed
    pub feed_urls: usize,
    /// Non-blank URLs received from the sitemap
    pub sitemap_urls: usize,
    /// Distinct normalized links across both sources
    pub candidates: usize,
    pub check: ExistenceCheck,
}

impl Reconciliation {
    /// Links that need a backfill, in discovery order.
    pub fn missing(&self) -> &[String] {
        &self.check.missing
    }
}

/// Unions discovery sources and works out which links are not stored yet.
#[derive(Debug, Clone)]
pub struct Reconciler {
    checker: ExistenceChecker,
}

impl Reconciler {
    pub fn new(checker: ExistenceChecker) -> Self {
        Self { checker }
    }

    /// Normalize both supplies, union them feed-first, and check the union.
    ///
    /// A link present in the store is never reported missing, whichever
    /// source(s) listed it. An empty union returns without touching `store`.
    pub async fn reconcile<L>(
        &self,
        store: &L,
        feed_urls: &[String],
        sitemap_urls: &[String],
        sink: &dyn ProgressSink,
    ) -> Reconciliation
    where
        L: LinkLookup + ?Sized,
    {
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(feed_urls.len() + sitemap_urls.len());
        let mut counts = [0usize; 2];

        for (source, urls) in [feed_urls, sitemap_urls].into_iter().enumerate() {
            for raw in urls {
                let raw = raw.trim();
                if raw.is_empty() {
                    continue;
                }
                counts[source] += 1;
                let link = normalize_link(raw);
                if seen.insert(link.clone()) {
                    candidates.push(link);
                }
            }
        }

        tracing::info!(
            feed = counts[0],
            sitemap = counts[1],
            candidates = candidates.len(),
            batch_size = self.checker.batch_size(),
            "Reconciling discovery sources"
        );

        let check = if candidates.is_empty() {
            ExistenceCheck::default()
        } else {
            self.checker.check(store, &candidates, sink).await
        };

        Reconciliation {
            feed_urls: counts[0],
            sitemap_urls: counts[1],
            candidates: candidates.len(),
            check,
        }
    }
}
