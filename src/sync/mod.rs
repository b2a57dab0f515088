//! Reconciliation core: decides which discovered links still need fetching
//! and persists articles idempotently.
//!
//! - [`ExistenceChecker`] checks candidate links against the store in bounded
//!   batches
//! - [`Reconciler`] unions the feed and sitemap supplies and derives the
//!   missing set
//! - [`Backfiller`] fetches missing links one at a time under a rate limit
//! - [`UpsertEngine`] writes records with their creator and categories
//! - [`Pipeline`] sequences all of the above for one run
//!
//! Every stage records its failures in a [`ReconciliationReport`] instead of
//! aborting the run.

mod backfill;
mod checker;
mod pipeline;
mod reconciler;
mod report;
mod retry;
mod upsert;

pub use backfill::{ArticleFetcher, Backfiller};
pub use checker::{ExistenceCheck, ExistenceChecker, LinkLookup, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
pub use pipeline::Pipeline;
pub use reconciler::{Reconciliation, Reconciler};
pub use report::{
    BatchProgress, FailedBatch, FailedUrl, FailureStage, ProgressSink, ReconciliationReport,
    TracingProgress,
};
pub use retry::RetryPolicy;
pub use upsert::{UpsertEngine, UpsertError};
