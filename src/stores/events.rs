//! Structured diagnostic events emitted during crawler runs.
//!
//! Events are an append-only log scoped per crawler: handlers emit them
//! through the [`Context`](crate::context::Context), operators read them
//! back per crawler or run, and a fresh `run()` clears the previous run's
//! log before dispatching.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::Result;
use crate::types::{CrawlerName, RunId, StageName};

/// Severity of a diagnostic event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl EventLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Error => "error",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "info" => Ok(EventLevel::Info),
            "warning" => Ok(EventLevel::Warning),
            "error" => Ok(EventLevel::Error),
            other => Err(format!("unknown event level: {other}")),
        }
    }
}

/// One diagnostic log record for a crawler run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub crawler: CrawlerName,
    pub run_id: RunId,
    /// Stage that produced the event, when known.
    pub stage: Option<StageName>,
    pub level: EventLevel,
    pub message: String,
    /// Optional structured payload supplied by the emitting handler.
    pub payload: Option<Value>,
    pub at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        crawler: CrawlerName,
        run_id: RunId,
        level: EventLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            crawler,
            run_id,
            stage: None,
            level,
            message: message.into(),
            payload: None,
            at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_stage(mut self, stage: StageName) -> Self {
        self.stage = Some(stage);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Contract of the per-crawler event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event.
    async fn append(&self, event: Event) -> Result<()>;

    /// All events for a crawler, oldest first.
    async fn list(&self, crawler: &CrawlerName) -> Result<Vec<Event>>;

    /// Delete every event for a crawler, returning the number removed.
    async fn delete(&self, crawler: &CrawlerName) -> Result<u64>;
}
