//! Durable state shared by every crawler and worker process.
//!
//! Three narrow store contracts back the orchestration core:
//!
//! - [`WorkQueue`] — the durable work-item queue driving stage dispatch
//! - [`RunStore`] — immutable run records with cancellation marking
//! - [`EventStore`] — structured diagnostic events scoped per crawler
//!
//! Two backends implement all three: [`MemoryBackend`] for tests and
//! development, and [`SqliteBackend`] (behind the `sqlite` feature) for
//! durable multi-process deployments. The core holds no mutable shared
//! state of its own; correctness under concurrent workers rests on the
//! per-record atomicity of the backend.

pub mod events;
pub mod memory;
pub mod queue;
pub mod runs;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

pub use events::{Event, EventLevel, EventStore};
pub use memory::MemoryBackend;
pub use queue::{LeasedTask, Task, TaskOptions, WorkQueue, DEFAULT_LEASE_SECS};
pub use runs::{RunRecord, RunStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Backing persistence failed.
///
/// Store errors propagate to the caller of the failing operation; they never
/// corrupt the in-memory crawler graph, and `cancel`/`flush` remain safe to
/// retry after a partial failure.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("store backend error: {message}")]
    #[diagnostic(
        code(spinneret::store::backend),
        help("Check that the backing database is reachable and migrated.")
    )]
    Backend { message: String },

    #[error("failed to encode or decode stored payload: {source}")]
    #[diagnostic(
        code(spinneret::store::serde),
        help("The stored JSON shape does not match the current schema.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(source: serde_json::Error) -> Self {
        StoreError::Serde { source }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Shared handles to the three store contracts.
///
/// Cheap to clone; every crawler, worker, and scheduler in a process shares
/// the same bundle.
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn WorkQueue>,
    pub runs: Arc<dyn RunStore>,
    pub events: Arc<dyn EventStore>,
}

impl Stores {
    /// Volatile in-memory stores, suitable for tests and single-process use.
    #[must_use]
    pub fn in_memory() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        Self {
            queue: backend.clone(),
            runs: backend.clone(),
            events: backend,
        }
    }

    /// Durable sqlite-backed stores at `database_url`
    /// (example: `"sqlite://spinneret.db"`).
    #[cfg(feature = "sqlite")]
    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let backend = Arc::new(SqliteBackend::connect(database_url).await?);
        Ok(Self {
            queue: backend.clone(),
            runs: backend.clone(),
            events: backend,
        })
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish()
    }
}
