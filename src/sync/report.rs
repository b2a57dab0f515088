use serde::Serialize;

/// Progress after one existence-check batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    /// 0-based batch index
    pub index: usize,
    /// Keys in this batch
    pub size: usize,
    /// Keys checked so far, this batch included
    pub checked_so_far: usize,
    /// Total keys in the run
    pub total: usize,
    /// Existing links found so far
    pub existing_so_far: usize,
}

/// A batch whose query kept failing after all retries. Its keys were counted
/// as missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedBatch {
    pub index: usize,
    pub size: usize,
    pub error: String,
}

/// Which step a URL failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Network, HTTP status, timeout, oversized body
    Fetch,
    /// The page or entry could not be turned into a valid record
    Parse,
    /// The record could not be written
    Persist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUrl {
    pub url: String,
    pub stage: FailureStage,
    pub reason: String,
}

/// Accounting for one reconciliation run.
///
/// Built up locally by the pipeline stages and returned to the caller; never
/// stored in shared state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Records parsed from the feed
    pub feed_records: usize,
    /// Feed records persisted
    pub feed_ingested: usize,
    /// Feed records that failed to persist
    pub feed_failed: usize,
    /// Raw URLs listed by the sitemap
    pub sitemap_urls: usize,
    /// Distinct normalized links from both sources
    pub total_candidates: usize,
    /// Existence-check batches executed
    pub batches: usize,
    /// Batches that failed after all retries
    pub failed_batches: Vec<FailedBatch>,
    /// Candidates already stored
    pub existing: usize,
    /// Candidates not stored (failed batches included)
    pub missing: usize,
    /// Missing links fetched and persisted
    pub backfilled: usize,
    /// Missing links left for a later run by the backfill limit
    pub deferred: usize,
    /// Every URL that failed, in processing order
    pub failed_urls: Vec<FailedUrl>,
    /// Articles in the store at the end of the run
    pub article_count: i64,
}

impl ReconciliationReport {
    /// Append a failed URL and return it, for forwarding to a sink.
    pub fn record_failure(&mut self, url: impl Into<String>, stage: FailureStage, reason: impl ToString) -> &FailedUrl {
        self.failed_urls.push(FailedUrl {
            url: url.into(),
            stage,
            reason: reason.to_string(),
        });
        &self.failed_urls[self.failed_urls.len() - 1]
    }

    /// `true` when no batch and no URL failed.
    pub fn is_clean(&self) -> bool {
        self.failed_batches.is_empty() && self.failed_urls.is_empty()
    }
}

/// Receives progress notifications. Implementations must not panic and have
/// no way to influence the run.
pub trait ProgressSink: Send + Sync {
    fn batch_checked(&self, progress: &BatchProgress);
    fn batch_failed(&self, failure: &FailedBatch);
    fn url_failed(&self, failure: &FailedUrl);
    fn finished(&self, report: &ReconciliationReport);
}

/// Default sink: structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn batch_checked(&self, p: &BatchProgress) {
        tracing::info!(
            batch = p.index + 1,
            size = p.size,
            checked = p.checked_so_far,
            total = p.total,
            existing = p.existing_so_far,
            "Existence batch checked"
        );
    }

    fn batch_failed(&self, f: &FailedBatch) {
        tracing::warn!(
            batch = f.index + 1,
            size = f.size,
            error = %f.error,
            "Existence batch failed after retries; treating its links as missing"
        );
    }

    fn url_failed(&self, f: &FailedUrl) {
        tracing::warn!(url = %f.url, stage = ?f.stage, reason = %f.reason, "Skipping URL");
    }

    fn finished(&self, r: &ReconciliationReport) {
        tracing::info!(
            candidates = r.total_candidates,
            batches = r.batches,
            failed_batches = r.failed_batches.len(),
            existing = r.existing,
            missing = r.missing,
            backfilled = r.backfilled,
            deferred = r.deferred,
            failed = r.failed_urls.len(),
            articles = r.article_count,
            "Reconciliation finished"
        );
        for f in &r.failed_urls {
            tracing::info!(url = %f.url, stage = ?f.stage, reason = %f.reason, "Failed URL");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_failure_and_is_clean() {
        let mut report = ReconciliationReport::default();
        assert!(report.is_clean());

        report.record_failure("https://x.com/a", FailureStage::Fetch, "HTTP error: status 404");
        assert!(!report.is_clean());
        assert_eq!(report.failed_urls[0].stage, FailureStage::Fetch);
        assert_eq!(report.failed_urls[0].reason, "HTTP error: status 404");
    }

    #[test]
    fn test_report_serializes_stage_snake_case() {
        let mut report = ReconciliationReport::default();
        report.record_failure("https://x.com/a", FailureStage::Persist, "locked");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failed_urls"][0]["stage"], "persist");
        assert_eq!(json["missing"], 0);
    }
}
