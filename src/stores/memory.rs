//! Volatile in-memory backend implementing all three store contracts.
//!
//! The twin of the sqlite backend for tests and single-process development:
//! same observable behavior, no durability. Interior mutability is a single
//! parking_lot mutex per store; operations are short and never await while
//! holding a lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::events::{Event, EventStore};
use super::queue::{LeasedTask, Task, TaskOptions, WorkQueue, DEFAULT_LEASE_SECS};
use super::runs::{RunRecord, RunStore};
use super::Result;
use crate::types::{CrawlerName, RunId};

#[derive(Debug)]
struct QueueEntry {
    lease: i64,
    task: Task,
    not_before: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    /// `None` means unleased; a past instant means the lease timed out.
    leased_until: Option<DateTime<Utc>>,
}

impl QueueEntry {
    fn lease_active(&self, now: DateTime<Utc>) -> bool {
        self.leased_until.map(|t| t > now).unwrap_or(false)
    }
}

#[derive(Default)]
struct QueueInner {
    entries: Vec<QueueEntry>,
    next_lease: i64,
}

/// In-memory work queue, run store, and event store in one.
pub struct MemoryBackend {
    queue: Mutex<QueueInner>,
    runs: Mutex<Vec<RunRecord>>,
    events: Mutex<Vec<Event>>,
    lease_secs: u64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            queue: Mutex::default(),
            runs: Mutex::default(),
            events: Mutex::default(),
            lease_secs: DEFAULT_LEASE_SECS,
        }
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the lease visibility timeout (seconds).
    #[must_use]
    pub fn with_lease_timeout(mut self, lease_secs: u64) -> Self {
        self.lease_secs = lease_secs;
        self
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").finish()
    }
}

#[async_trait]
impl WorkQueue for MemoryBackend {
    async fn enqueue(&self, task: Task, options: TaskOptions) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.queue.lock();
        inner.next_lease += 1;
        let lease = inner.next_lease;
        inner.entries.push(QueueEntry {
            lease,
            task,
            not_before: options.not_before(now),
            expires_at: options.expires_at(now),
            leased_until: None,
        });
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<LeasedTask>> {
        let now = Utc::now();
        let lease_until = now + chrono::Duration::seconds(self.lease_secs as i64);
        let mut inner = self.queue.lock();
        // Stale unclaimed tasks are discarded, not returned.
        inner
            .entries
            .retain(|e| e.lease_active(now) || e.expires_at.map(|t| t > now).unwrap_or(true));
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| !e.lease_active(now) && e.not_before <= now);
        Ok(entry.map(|e| {
            e.leased_until = Some(lease_until);
            LeasedTask {
                lease: e.lease,
                task: e.task.clone(),
            }
        }))
    }

    async fn complete(&self, leased: &LeasedTask) -> Result<()> {
        self.queue
            .lock()
            .entries
            .retain(|e| e.lease != leased.lease);
        Ok(())
    }

    async fn is_pending(&self, crawler: &CrawlerName) -> Result<bool> {
        let now = Utc::now();
        Ok(self.queue.lock().entries.iter().any(|e| {
            e.task.crawler == *crawler
                && (e.lease_active(now) || e.expires_at.map(|t| t > now).unwrap_or(true))
        }))
    }

    async fn flush(&self, crawler: &CrawlerName) -> Result<u64> {
        let mut inner = self.queue.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.task.crawler != *crawler);
        Ok((before - inner.entries.len()) as u64)
    }
}

#[async_trait]
impl RunStore for MemoryBackend {
    async fn begin(&self, crawler: &CrawlerName, run_id: &RunId, at: DateTime<Utc>) -> Result<()> {
        let mut runs = self.runs.lock();
        if !runs
            .iter()
            .any(|r| r.crawler == *crawler && r.run_id == *run_id)
        {
            runs.push(RunRecord {
                run_id: run_id.clone(),
                crawler: crawler.clone(),
                started_at: at,
                ended_at: None,
                operations: 0,
                aborted: false,
            });
        }
        Ok(())
    }

    async fn record_operation(&self, crawler: &CrawlerName, run_id: &RunId) -> Result<()> {
        let mut runs = self.runs.lock();
        match runs
            .iter_mut()
            .find(|r| r.crawler == *crawler && r.run_id == *run_id)
        {
            Some(run) => run.operations += 1,
            None => runs.push(RunRecord {
                run_id: run_id.clone(),
                crawler: crawler.clone(),
                started_at: Utc::now(),
                ended_at: None,
                operations: 1,
                aborted: false,
            }),
        }
        Ok(())
    }

    async fn mark_ended(
        &self,
        crawler: &CrawlerName,
        run_id: &RunId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut runs = self.runs.lock();
        if let Some(run) = runs
            .iter_mut()
            .find(|r| r.crawler == *crawler && r.run_id == *run_id && r.ended_at.is_none())
        {
            run.ended_at = Some(at);
        }
        Ok(())
    }

    async fn last_run(&self, crawler: &CrawlerName) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .runs
            .lock()
            .iter()
            .filter(|r| r.crawler == *crawler)
            .map(|r| r.started_at)
            .max())
    }

    async fn op_count(&self, crawler: &CrawlerName) -> Result<u64> {
        Ok(self
            .runs
            .lock()
            .iter()
            .filter(|r| r.crawler == *crawler)
            .map(|r| r.operations)
            .sum())
    }

    async fn runs(&self, crawler: &CrawlerName) -> Result<Vec<RunRecord>> {
        let mut records: Vec<RunRecord> = self
            .runs
            .lock()
            .iter()
            .filter(|r| r.crawler == *crawler)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }

    async fn latest_run_id(&self, crawler: &CrawlerName) -> Result<Option<RunId>> {
        Ok(self
            .runs
            .lock()
            .iter()
            .filter(|r| r.crawler == *crawler)
            .max_by_key(|r| r.started_at)
            .map(|r| r.run_id.clone()))
    }

    async fn is_aborted(&self, crawler: &CrawlerName, run_id: &RunId) -> Result<bool> {
        Ok(self
            .runs
            .lock()
            .iter()
            .any(|r| r.crawler == *crawler && r.run_id == *run_id && r.aborted))
    }

    async fn abort_all(&self, crawler: &CrawlerName) -> Result<u64> {
        let now = Utc::now();
        let mut aborted = 0;
        for run in self
            .runs
            .lock()
            .iter_mut()
            .filter(|r| r.crawler == *crawler && !r.aborted && r.ended_at.is_none())
        {
            run.aborted = true;
            run.ended_at = Some(now);
            aborted += 1;
        }
        Ok(aborted)
    }

    async fn flush(&self, crawler: &CrawlerName) -> Result<()> {
        self.runs.lock().retain(|r| r.crawler != *crawler);
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryBackend {
    async fn append(&self, event: Event) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn list(&self, crawler: &CrawlerName) -> Result<Vec<Event>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.crawler == *crawler)
            .cloned()
            .collect())
    }

    async fn delete(&self, crawler: &CrawlerName) -> Result<u64> {
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|e| e.crawler != *crawler);
        Ok((before - events.len()) as u64)
    }
}
