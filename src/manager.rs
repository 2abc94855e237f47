//! Loads crawl definitions and owns the shared execution infrastructure.
//!
//! A [`CrawlerManager`] holds the immutable crawler graph for one process:
//! every definition loaded from a directory of YAML documents, the handler
//! registry they were validated against, the store handles, and the blob
//! store. Workers and the scheduler borrow it through an `Arc`; reloading
//! configuration means building a fresh manager.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ConfigError;
use crate::context::{BlobStore, Context, ContextSnapshot};
use crate::crawler::Crawler;
use crate::handler::HandlerRegistry;
use crate::settings::Settings;
use crate::stores::Stores;
use crate::types::{CrawlerName, RunId, StageName};

/// A context snapshot referenced a crawler or stage this process does not
/// know about.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("unknown crawler: {name}")]
    #[diagnostic(
        code(spinneret::manager::unknown_crawler),
        help("The referencing work item may predate a configuration reload.")
    )]
    UnknownCrawler { name: CrawlerName },

    #[error("crawler {crawler} has no stage {stage}")]
    #[diagnostic(code(spinneret::manager::unknown_stage))]
    UnknownStage {
        crawler: CrawlerName,
        stage: StageName,
    },
}

/// The set of loaded crawl definitions plus the infrastructure they share.
pub struct CrawlerManager {
    crawlers: FxHashMap<CrawlerName, Arc<Crawler>>,
    registry: HandlerRegistry,
    stores: Stores,
    settings: Settings,
    blobs: BlobStore,
}

impl CrawlerManager {
    #[must_use]
    pub fn new(settings: Settings, registry: HandlerRegistry, stores: Stores) -> Self {
        let blobs = BlobStore::new(&settings.data_path);
        Self {
            crawlers: FxHashMap::default(),
            registry,
            stores,
            settings,
            blobs,
        }
    }

    /// Load one crawl document, registering it under its resolved name.
    pub fn load_crawler(
        &mut self,
        document: &str,
        source_name: &str,
    ) -> Result<Arc<Crawler>, ConfigError> {
        let crawler = Arc::new(Crawler::load(
            document,
            source_name,
            &self.registry,
            &self.settings,
            self.stores.clone(),
        )?);
        self.crawlers
            .insert(crawler.name().clone(), crawler.clone());
        Ok(crawler)
    }

    /// Load every `*.yml`/`*.yaml` document in a directory.
    ///
    /// Documents that fail validation are skipped and logged; one bad file
    /// does not block the rest. Returns the number of crawlers loaded.
    pub fn load_directory(&mut self, dir: impl AsRef<Path>) -> Result<usize, ConfigError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yml" || e == "yaml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            let source_name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("crawler")
                .to_string();
            let document = match std::fs::read_to_string(&path) {
                Ok(document) => document,
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping unreadable crawl definition");
                    continue;
                }
            };
            match self.load_crawler(&document, &source_name) {
                Ok(crawler) => {
                    tracing::info!(crawler = %crawler.name(), path = %path.display(), "loaded crawl definition");
                    loaded += 1;
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping invalid crawl definition");
                }
            }
        }
        Ok(loaded)
    }

    /// A loaded crawler by name.
    #[must_use]
    pub fn get(&self, name: &CrawlerName) -> Option<Arc<Crawler>> {
        self.crawlers.get(name).cloned()
    }

    /// All loaded crawlers, in no particular order.
    pub fn crawlers(&self) -> impl Iterator<Item = &Arc<Crawler>> {
        self.crawlers.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.crawlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.crawlers.is_empty()
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Build an execution context for a stage of a loaded crawler.
    pub fn make_context(
        &self,
        crawler: &Arc<Crawler>,
        stage: &StageName,
        run_id: RunId,
        state: FxHashMap<String, Value>,
    ) -> Result<Context, ResolveError> {
        let stage_def = crawler.get(stage).ok_or_else(|| ResolveError::UnknownStage {
            crawler: crawler.name().clone(),
            stage: stage.clone(),
        })?;
        Ok(Context::new(
            crawler.clone(),
            stage_def.clone(),
            run_id,
            state,
            self.stores.clone(),
            self.blobs.clone(),
        ))
    }

    /// Reconstruct a context from a serialized snapshot, retargeted at
    /// `stage` — the receiving half of the queue round trip.
    pub fn context_from_state(
        &self,
        snapshot: ContextSnapshot,
        stage: &StageName,
    ) -> Result<Context, ResolveError> {
        let crawler = self
            .get(&snapshot.crawler)
            .ok_or_else(|| ResolveError::UnknownCrawler {
                name: snapshot.crawler.clone(),
            })?;
        Context::from_state(
            snapshot,
            crawler.clone(),
            stage,
            self.stores.clone(),
            self.blobs.clone(),
        )
        .ok_or_else(|| ResolveError::UnknownStage {
            crawler: crawler.name().clone(),
            stage: stage.clone(),
        })
    }
}

impl std::fmt::Debug for CrawlerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.crawlers.keys().map(|n| n.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("CrawlerManager")
            .field("crawlers", &names)
            .finish()
    }
}
