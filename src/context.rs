//! Per-work-item execution state handed to stage handlers.
//!
//! A [`Context`] carries run identity, crawl identity, stage identity, and
//! the open-ended state map threaded through the pipeline. It is built
//! fresh at dequeue time and serializes to a [`ContextSnapshot`] so an
//! equivalent context can be reconstructed in another process after a trip
//! through the work queue.
//!
//! Beyond identity, the context is the handler's window onto the shared
//! infrastructure: event emission and the content-addressed [`BlobStore`].

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::crawler::Crawler;
use crate::stage::Stage;
use crate::stores::{Event, EventLevel, Stores};
use crate::types::{CrawlerName, RunId, StageName};

/// State key carrying the incremental-mode flag.
pub const STATE_INCREMENTAL: &str = "incremental";

/// Serialized shape of a context: everything needed to rebuild it on the
/// receiving side of the queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub crawler: CrawlerName,
    pub run_id: RunId,
    pub stage: StageName,
    #[serde(default)]
    pub state: FxHashMap<String, Value>,
}

/// Execution context passed to a stage handler for one work item.
#[derive(Clone)]
pub struct Context {
    crawler: Arc<Crawler>,
    stage: Stage,
    run_id: RunId,
    state: FxHashMap<String, Value>,
    stores: Stores,
    blobs: BlobStore,
}

impl Context {
    pub(crate) fn new(
        crawler: Arc<Crawler>,
        stage: Stage,
        run_id: RunId,
        state: FxHashMap<String, Value>,
        stores: Stores,
        blobs: BlobStore,
    ) -> Self {
        Self {
            crawler,
            stage,
            run_id,
            state,
            stores,
            blobs,
        }
    }

    #[must_use]
    pub fn crawler(&self) -> &Arc<Crawler> {
        &self.crawler
    }

    #[must_use]
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The key-value state threaded through the pipeline for this run.
    #[must_use]
    pub fn state(&self) -> &FxHashMap<String, Value> {
        &self.state
    }

    /// A single state entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Set a state entry; it travels with every successor work item this
    /// handler emits unless the emitted output overrides it.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.insert(key.into(), value.into());
    }

    /// Whether this run is incremental.
    #[must_use]
    pub fn incremental(&self) -> bool {
        self.state
            .get(STATE_INCREMENTAL)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// A stage parameter from the crawl document.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.stage.param(key)
    }

    /// Serialize this context for a trip through the work queue.
    #[must_use]
    pub fn dump_state(&self) -> ContextSnapshot {
        ContextSnapshot {
            crawler: self.crawler.name().clone(),
            run_id: self.run_id.clone(),
            stage: self.stage.name().clone(),
            state: self.state.clone(),
        }
    }

    /// Reconstruct a context from a snapshot against an already-resolved
    /// crawler, retargeted at `stage`.
    ///
    /// Returns `None` if the stage is not part of the crawler's pipeline.
    #[must_use]
    pub fn from_state(
        snapshot: ContextSnapshot,
        crawler: Arc<Crawler>,
        stage: &StageName,
        stores: Stores,
        blobs: BlobStore,
    ) -> Option<Self> {
        let stage = crawler.get(stage)?.clone();
        Some(Self::new(
            crawler,
            stage,
            snapshot.run_id,
            snapshot.state,
            stores,
            blobs,
        ))
    }

    /// Append a diagnostic event for this run.
    pub async fn emit(
        &self,
        level: EventLevel,
        message: impl Into<String>,
        payload: Option<Value>,
    ) -> Result<(), crate::stores::StoreError> {
        let mut event = Event::new(
            self.crawler.name().clone(),
            self.run_id.clone(),
            level,
            message,
        )
        .with_stage(self.stage.name().clone());
        if let Some(payload) = payload {
            event = event.with_payload(payload);
        }
        self.stores.events.append(event).await
    }

    /// Append an info-level event.
    pub async fn info(
        &self,
        message: impl Into<String>,
    ) -> Result<(), crate::stores::StoreError> {
        self.emit(EventLevel::Info, message, None).await
    }

    /// Append a warning-level event.
    pub async fn warning(
        &self,
        message: impl Into<String>,
    ) -> Result<(), crate::stores::StoreError> {
        self.emit(EventLevel::Warning, message, None).await
    }

    /// Append an error-level event.
    pub async fn error(
        &self,
        message: impl Into<String>,
    ) -> Result<(), crate::stores::StoreError> {
        self.emit(EventLevel::Error, message, None).await
    }

    /// Store a blob, returning its content hash.
    pub async fn store_data(&self, data: &[u8]) -> std::io::Result<String> {
        self.blobs.store(data).await
    }

    /// Open a previously stored blob by content hash.
    pub async fn load_file(&self, content_hash: &str) -> std::io::Result<tokio::fs::File> {
        self.blobs.open(content_hash).await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("crawler", self.crawler.name())
            .field("stage", self.stage.name())
            .field("run_id", &self.run_id)
            .finish()
    }
}

/// Content-addressed filesystem blob store.
///
/// Blobs land at `<root>/<hash[0..2]>/<hash>`; a blob stored in one worker
/// process is readable from any other process sharing the root.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Hashes arrive from handler state, so they are untrusted input: only
    /// ASCII hex is accepted, which also rules out path separators.
    fn path_for(&self, content_hash: &str) -> std::io::Result<PathBuf> {
        if content_hash.len() < 2 || !content_hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a hex content hash: {content_hash:?}"),
            ));
        }
        Ok(self.root.join(&content_hash[..2]).join(content_hash))
    }

    /// Write a blob, returning its sha256 content hash. Re-storing
    /// identical bytes is a cheap overwrite of the same path.
    pub async fn store(&self, data: &[u8]) -> std::io::Result<String> {
        let content_hash = hex::encode(Sha256::digest(data));
        let path = self.path_for(&content_hash)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(content_hash)
    }

    /// Open a stored blob for reading.
    pub async fn open(&self, content_hash: &str) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(self.path_for(content_hash)?).await
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
