//! The durable work queue that drives stage-to-stage dispatch.
//!
//! A [`Task`] names a target stage for one crawler run and carries the
//! serialized state map a handler needs to resume. Tasks stay owned by the
//! queue until a worker leases them; completing the lease removes the
//! record. `is_pending` is the liveness query behind
//! [`Crawler::is_running`](crate::crawler::Crawler::is_running).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Result;
use crate::types::{CrawlerName, RunId, StageName};

/// One unit of queued work: a target stage plus the state to hand it.
///
/// The serialized shape round-trips the crawler name, run id, stage name,
/// and the open-ended key-value state map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub crawler: CrawlerName,
    pub run_id: RunId,
    pub stage: StageName,
    #[serde(default)]
    pub state: FxHashMap<String, Value>,
}

/// Visibility options applied at enqueue time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Seconds to hold the task back before it becomes visible to workers.
    pub delay_secs: u64,
    /// Seconds after which an unclaimed task is stale and discardable.
    /// `None` means the task never expires.
    pub expire_secs: Option<u64>,
}

impl TaskOptions {
    /// Absolute visibility time for a task enqueued at `now`.
    #[must_use]
    pub fn not_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(self.delay_secs as i64)
    }

    /// Absolute expiry time for a task enqueued at `now`, if any.
    #[must_use]
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expire_secs
            .map(|secs| now + chrono::Duration::seconds(secs as i64))
    }
}

/// How long a lease stays exclusive before the task becomes leasable again.
///
/// A worker that dies mid-task never calls [`WorkQueue::complete`]; once
/// this window passes another worker may re-lease the task, so no crawler
/// is starved by a crashed process. Processing is therefore at-least-once.
pub const DEFAULT_LEASE_SECS: u64 = 300;

/// A task checked out by a worker, identified by its lease id.
///
/// The lease id is only meaningful to the queue that issued it; workers pass
/// the whole lease back to [`WorkQueue::complete`] when done. A lease held
/// past the queue's lease timeout is forfeit: the task may be handed to
/// another worker, and the late `complete` becomes a no-op if that worker
/// finishes first.
#[derive(Clone, Debug, PartialEq)]
pub struct LeasedTask {
    pub lease: i64,
    pub task: Task,
}

/// Contract of the durable, prioritizable work-item queue.
///
/// Implementations must be safe under concurrent access from multiple
/// worker processes; `flush` may race with an in-progress dequeue (the
/// worker finishes its current item, but its `complete` call then finds
/// nothing to remove, which is fine).
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Add a task, honouring the delay/expiry visibility options.
    async fn enqueue(&self, task: Task, options: TaskOptions) -> Result<()>;

    /// Lease the oldest visible task, if any. Expired tasks are discarded,
    /// never returned; tasks whose previous lease timed out are handed out
    /// again.
    async fn dequeue(&self) -> Result<Option<LeasedTask>>;

    /// Remove a completed task. Completing a lease that was flushed away in
    /// the meantime is a no-op.
    async fn complete(&self, leased: &LeasedTask) -> Result<()>;

    /// True iff at least one task for this crawler is queued or leased.
    async fn is_pending(&self, crawler: &CrawlerName) -> Result<bool>;

    /// Remove every queued and leased task for this crawler, returning the
    /// number of records removed.
    async fn flush(&self, crawler: &CrawlerName) -> Result<u64>;
}
