//! Stage handler capabilities and the registry that resolves them by name.
//!
//! A handler is the opaque unit of work bound to a pipeline stage: fetch a
//! page, parse a listing, store a document. The orchestration core never
//! looks inside one; it resolves the handler id from a [`HandlerRegistry`]
//! at dispatch time, invokes [`StageHandler::process`], and routes whatever
//! the handler emitted through the stage's routing table.
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use spinneret::context::Context;
//! use spinneret::handler::{Emitted, HandlerError, HandlerRegistry, StageHandler};
//!
//! struct SeedUrls;
//!
//! #[async_trait]
//! impl StageHandler for SeedUrls {
//!     async fn process(&self, ctx: &mut Context) -> Result<Vec<Emitted>, HandlerError> {
//!         ctx.info("seeding start urls").await?;
//!         Ok(vec![Emitted::new("fetch").with_value("url", "https://example.com")])
//!     }
//! }
//!
//! let registry = HandlerRegistry::new().with_handler("seed", SeedUrls);
//! assert!(registry.get("seed").is_some());
//! ```

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::context::Context;
use crate::stores::StoreError;

/// Output produced by a handler: a routing label plus the state to thread
/// into the downstream stage.
///
/// The label is matched against the owning stage's `handle` table to find
/// the downstream stage name; unmatched labels are dropped with a warning.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Emitted {
    /// Routing label, e.g. `"fetch"` or `"store"`.
    pub rule: String,
    /// State entries to merge over the current context state for the
    /// successor work item.
    pub state: FxHashMap<String, Value>,
}

impl Emitted {
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            state: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: FxHashMap<String, Value>) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.state.insert(key.into(), value.into());
        self
    }
}

/// A single named unit of crawl work.
///
/// Handlers should be stateless: everything they need arrives in the
/// [`Context`] (run identity, stage params, threaded state, store access).
/// A returned error is caught by the worker loop, logged as an error event,
/// and does not crash the worker or affect other crawlers.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Process one work item, returning zero or more routed outputs.
    async fn process(&self, ctx: &mut Context) -> Result<Vec<Emitted>, HandlerError>;
}

/// Errors raised by stage handlers during processing.
#[derive(Debug, Error, Diagnostic)]
pub enum HandlerError {
    /// Expected state entry is missing from the context.
    #[error("missing expected state entry: {what}")]
    #[diagnostic(
        code(spinneret::handler::missing_state),
        help("Check that the upstream stage emitted the required entry.")
    )]
    MissingState { what: &'static str },

    /// Handler-specific processing failure.
    #[error("handler failed: {0}")]
    #[diagnostic(code(spinneret::handler::failed))]
    Failed(String),

    /// JSON encode/decode failure inside a handler.
    #[error(transparent)]
    #[diagnostic(code(spinneret::handler::serde))]
    Serde(#[from] serde_json::Error),

    /// A store operation issued through the context failed.
    #[error(transparent)]
    #[diagnostic(code(spinneret::handler::store))]
    Store(#[from] StoreError),

    /// Blob store I/O failure.
    #[error("blob store i/o error: {0}")]
    #[diagnostic(code(spinneret::handler::io))]
    Io(#[from] std::io::Error),
}

/// Registry mapping handler ids to [`StageHandler`] capabilities.
///
/// Handlers are registered at process startup; crawl documents then refer
/// to them by id. Unknown ids are rejected at load time, not at dispatch
/// time.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: FxHashMap<String, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under an id. Re-registering an id replaces the
    /// previous handler.
    pub fn register(&mut self, id: impl Into<String>, handler: impl StageHandler + 'static) {
        self.handlers.insert(id.into(), Arc::new(handler));
    }

    /// Builder-style registration for fluent setup.
    #[must_use]
    pub fn with_handler(
        mut self,
        id: impl Into<String>,
        handler: impl StageHandler + 'static,
    ) -> Self {
        self.register(id, handler);
        self
    }

    /// Resolve a handler by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(id).cloned()
    }

    /// Whether a handler id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("HandlerRegistry").field("ids", &ids).finish()
    }
}
