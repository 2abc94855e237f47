//! Run records: one row per execution of a crawler.
//!
//! Runs are append-mostly. A record is created by
//! [`Crawler::run`](crate::crawler::Crawler::run) (or implicitly by the
//! first operation counted against an unknown run id), mutated only by
//! operation counting, end marking, and abort marking, and deleted only by
//! an explicit flush of the crawler's history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Result;
use crate::types::{CrawlerName, RunId};

/// Immutable record of one crawler execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub crawler: CrawlerName,
    pub started_at: DateTime<Utc>,
    /// Set when the run drains or is cancelled.
    pub ended_at: Option<DateTime<Utc>>,
    /// Stage operations performed so far.
    pub operations: u64,
    pub aborted: bool,
}

/// Contract of the run-history store.
///
/// All operations are scoped by crawler name and must stay correct under
/// concurrent workers; `record_operation` in particular is a per-record
/// atomic increment.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Record the start of a run. Idempotent per (crawler, run id).
    async fn begin(&self, crawler: &CrawlerName, run_id: &RunId, at: DateTime<Utc>) -> Result<()>;

    /// Count one stage operation against a run, creating the record if the
    /// run id has not been seen before.
    async fn record_operation(&self, crawler: &CrawlerName, run_id: &RunId) -> Result<()>;

    /// Mark a run ended. No-op for unknown or already-ended runs.
    async fn mark_ended(
        &self,
        crawler: &CrawlerName,
        run_id: &RunId,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Start time of the most recent run, if any.
    async fn last_run(&self, crawler: &CrawlerName) -> Result<Option<DateTime<Utc>>>;

    /// Total operations across all of this crawler's runs.
    async fn op_count(&self, crawler: &CrawlerName) -> Result<u64>;

    /// Full run history, most recent first.
    async fn runs(&self, crawler: &CrawlerName) -> Result<Vec<RunRecord>>;

    /// Run id of the most recently started run, if any.
    async fn latest_run_id(&self, crawler: &CrawlerName) -> Result<Option<RunId>>;

    /// Whether this run has been marked aborted. Unknown runs are not
    /// aborted.
    async fn is_aborted(&self, crawler: &CrawlerName, run_id: &RunId) -> Result<bool>;

    /// Mark every open run for this crawler aborted and ended, returning
    /// how many were affected. Idempotent.
    async fn abort_all(&self, crawler: &CrawlerName) -> Result<u64>;

    /// Irreversibly delete the crawler's entire run history.
    async fn flush(&self, crawler: &CrawlerName) -> Result<()>;
}
