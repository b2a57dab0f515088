use std::collections::HashSet;

use async_trait::async_trait;

use super::report::{BatchProgress, FailedBatch, ProgressSink};
use super::retry::RetryPolicy;
use crate::config::ConfigError;
use crate::storage::StoreError;

/// Default number of links per existence query.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Largest batch that fits SQLite's bound-parameter limit (32766).
pub const MAX_BATCH_SIZE: usize = 32_766;

/// Answers "which of these links are already stored?".
///
/// One call is one query; the checker decides how many links go in it.
#[async_trait]
pub trait LinkLookup: Send + Sync {
    async fn find_existing_links(&self, links: &[String]) -> Result<HashSet<String>, StoreError>;
}

/// Result of checking a candidate set against the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistenceCheck {
    /// Candidates found in the store
    pub existing: HashSet<String>,
    /// Candidates not found, in input order (failed batches included)
    pub missing: Vec<String>,
    /// Number of batches executed
    pub batches: usize,
    pub failed_batches: Vec<FailedBatch>,
}

/// Splits candidate links into bounded batches and queries the store once per
/// batch, retrying transient failures.
#[derive(Debug, Clone)]
pub struct ExistenceChecker {
    batch_size: usize,
    retry: RetryPolicy,
}

impl ExistenceChecker {
    pub fn new(batch_size: usize, retry: RetryPolicy) -> Result<Self, ConfigError> {
        if batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be greater than 0".into()));
        }
        if batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be at most {MAX_BATCH_SIZE}, got {batch_size}"
            )));
        }
        Ok(Self { batch_size, retry })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Check `keys` against `store`.
    ///
    /// Keys are deduplicated keeping first appearance, then checked in order
    /// in chunks of at most `batch_size`. A batch that still fails after all
    /// retries has its keys reported as missing; the check itself never fails.
    pub async fn check<L>(&self, store: &L, keys: &[String], sink: &dyn ProgressSink) -> ExistenceCheck
    where
        L: LinkLookup + ?Sized,
    {
        let mut seen: HashSet<&String> = HashSet::with_capacity(keys.len());
        let unique: Vec<String> = keys.iter().filter(|k| seen.insert(*k)).cloned().collect();

        let total = unique.len();
        let mut result = ExistenceCheck::default();
        let mut checked = 0;

        for (index, batch) in unique.chunks(self.batch_size).enumerate() {
            let found = self
                .retry
                .run(
                    || store.find_existing_links(batch),
                    |e, retry, delay| {
                        tracing::warn!(
                            batch = index + 1,
                            retry = retry + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Existence query failed, retrying"
                        );
                    },
                )
                .await;

            match found {
                Ok(found) => {
                    // Only keys from this batch count, whatever the store returned.
                    for key in batch {
                        if found.contains(key) {
                            result.existing.insert(key.clone());
                        } else {
                            result.missing.push(key.clone());
                        }
                    }
                }
                Err(e) => {
                    let failure = FailedBatch {
                        index,
                        size: batch.len(),
                        error: e.to_string(),
                    };
                    sink.batch_failed(&failure);
                    result.failed_batches.push(failure);
                    result.missing.extend(batch.iter().cloned());
                }
            }

            checked += batch.len();
            result.batches += 1;
            sink.batch_checked(&BatchProgress {
                index,
                size: batch.len(),
                checked_so_far: checked,
                total,
                existing_so_far: result.existing.len(),
            });
        }

        result
    }
}
