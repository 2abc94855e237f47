//! The crawl definition: a processing graph plus its schedule and lifecycle.
//!
//! A [`Crawler`] is constructed once from a YAML document and immutable
//! afterwards. Everything runtime-derived (`is_running`, `last_run`,
//! `op_count`, ...) is a live query against the shared stores, never cached
//! on the definition, so every process sharing the stores sees the same
//! answers.
//!
//! The lifecycle state machine per crawler is
//! `Idle → Running → {Completed, Cancelled} → Idle`; a new [`run`]
//! forces a transition through `Cancelled` first when anything was still
//! active, so two runs of the same crawler never interleave.
//!
//! [`run`]: Crawler::run

use chrono::{DateTime, Utc};
use futures_util::try_join;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::instrument;

use crate::config::{ConfigError, CrawlerConfig};
use crate::handler::HandlerRegistry;
use crate::settings::Settings;
use crate::stage::Stage;
use crate::stores::{RunRecord, StoreError, Stores, Task, TaskOptions};
use crate::types::{CrawlerName, RunId, Schedule, StageName};

/// Conventional entry stage when the document names none.
pub const DEFAULT_INIT_STAGE: &str = "init";
/// Default category tag for crawl definitions.
pub const DEFAULT_CATEGORY: &str = "scrape";

/// A named, scheduled description of a scraping pipeline.
pub struct Crawler {
    name: CrawlerName,
    description: String,
    category: String,
    schedule: Option<Schedule>,
    disabled: bool,
    init: StageName,
    delay_secs: u64,
    expire_secs: u64,
    stealthy: bool,
    stage_order: Vec<StageName>,
    stages: FxHashMap<StageName, Stage>,
    default_incremental: bool,
    stores: Stores,
}

impl Crawler {
    /// Parse and validate a crawl document, constructing the immutable
    /// stage graph.
    ///
    /// `source_name` is the fallback identity (conventionally the document's
    /// file stem) used when the document carries no `name` key. Fails with
    /// [`ConfigError`] when the pipeline is empty, the init pointer or a
    /// route target names an unknown stage, or a stage names an
    /// unregistered handler.
    pub fn load(
        document: &str,
        source_name: &str,
        registry: &HandlerRegistry,
        settings: &Settings,
        stores: Stores,
    ) -> Result<Self, ConfigError> {
        let config = CrawlerConfig::from_yaml(document)?;
        Self::from_config(config, source_name, registry, settings, stores)
    }

    /// Second load phase: validate an already-parsed document.
    pub fn from_config(
        config: CrawlerConfig,
        source_name: &str,
        registry: &HandlerRegistry,
        settings: &Settings,
        stores: Stores,
    ) -> Result<Self, ConfigError> {
        let name = config.name.clone().unwrap_or_else(|| source_name.to_string());

        let stage_configs = config.stages(&name)?;
        if stage_configs.is_empty() {
            return Err(ConfigError::EmptyPipeline { crawler: name });
        }

        let stage_order: Vec<StageName> = stage_configs
            .iter()
            .map(|(stage_name, _)| StageName::from(stage_name.as_str()))
            .collect();

        let mut stages = FxHashMap::default();
        for (stage_name, stage_config) in &stage_configs {
            if !registry.contains(&stage_config.method) {
                return Err(ConfigError::UnknownHandler {
                    crawler: name,
                    stage: stage_name.clone(),
                    handler: stage_config.method.clone(),
                });
            }
            for (label, target) in &stage_config.handle {
                if !stage_order.iter().any(|s| s.as_str() == target) {
                    return Err(ConfigError::UnknownRouteTarget {
                        crawler: name,
                        stage: stage_name.clone(),
                        label: label.clone(),
                        target: target.clone(),
                    });
                }
            }
            let handle = stage_config
                .handle
                .iter()
                .map(|(label, target)| (label.clone(), StageName::from(target.as_str())))
                .collect();
            stages.insert(
                StageName::from(stage_name.as_str()),
                Stage::new(
                    StageName::from(stage_name.as_str()),
                    stage_config.method.clone(),
                    handle,
                    stage_config.params.clone(),
                ),
            );
        }

        let init = StageName::from(config.init.as_deref().unwrap_or(DEFAULT_INIT_STAGE));
        if !stages.contains_key(&init) {
            return Err(ConfigError::UnknownInitStage {
                crawler: name,
                init: init.to_string(),
            });
        }

        Ok(Self {
            description: config.description.clone().unwrap_or_else(|| name.clone()),
            category: config
                .category
                .clone()
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            name: CrawlerName::from(name.as_str()),
            schedule: config.schedule,
            disabled: config.disabled,
            init,
            delay_secs: config.delay,
            expire_secs: config.expire.unwrap_or(settings.expire_days) * 86_400,
            stealthy: config.stealthy,
            stage_order,
            stages,
            default_incremental: settings.incremental,
            stores,
        })
    }

    #[must_use]
    pub fn name(&self) -> &CrawlerName {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub fn schedule(&self) -> Option<Schedule> {
        self.schedule
    }

    #[must_use]
    pub fn disabled(&self) -> bool {
        self.disabled
    }

    #[must_use]
    pub fn init_stage(&self) -> &StageName {
        &self.init
    }

    /// Seconds queued work for this crawler is held back before dispatch.
    #[must_use]
    pub fn delay_secs(&self) -> u64 {
        self.delay_secs
    }

    /// Seconds after which queued work for this crawler is stale.
    #[must_use]
    pub fn expire_secs(&self) -> u64 {
        self.expire_secs
    }

    /// Hint consumed by downstream fetch stages.
    #[must_use]
    pub fn stealthy(&self) -> bool {
        self.stealthy
    }

    /// A stage by name.
    #[must_use]
    pub fn get(&self, stage: &StageName) -> Option<&Stage> {
        self.stages.get(stage)
    }

    /// Stages in document order.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stage_order.iter().filter_map(|name| self.stages.get(name))
    }

    fn queue_options(&self) -> TaskOptions {
        TaskOptions {
            delay_secs: self.delay_secs,
            expire_secs: Some(self.expire_secs),
        }
    }

    /// Whether this crawler is due to be triggered.
    ///
    /// False when disabled, already running, or unscheduled; true when no
    /// prior run exists; otherwise true iff the schedule interval has
    /// strictly elapsed since the last run. Pure query, no side effects.
    pub async fn check_due(&self) -> Result<bool, StoreError> {
        if self.disabled {
            return Ok(false);
        }
        let Some(schedule) = self.schedule else {
            return Ok(false);
        };
        if self.is_running().await? {
            return Ok(false);
        }
        match self.last_run().await? {
            None => Ok(true),
            Some(last_run) => Ok(Utc::now() > last_run + schedule.interval()),
        }
    }

    /// Queue the execution of this crawler, returning the run id.
    ///
    /// Strictly ordered: cancel any previous run, clear the previous run's
    /// events, then record the run and enqueue the initial work item. The
    /// ordering guarantees a fresh run never interleaves with stale queued
    /// work or stale diagnostic history.
    #[instrument(skip(self), fields(crawler = %self.name), err)]
    pub async fn run(
        &self,
        incremental: Option<bool>,
        run_id: Option<RunId>,
    ) -> Result<RunId, StoreError> {
        let run_id = run_id.unwrap_or_else(RunId::generate);
        let incremental = incremental.unwrap_or(self.default_incremental);

        let mut state = FxHashMap::default();
        state.insert("crawler".to_string(), Value::from(self.name.as_str()));
        state.insert("run_id".to_string(), Value::from(run_id.as_str()));
        state.insert("incremental".to_string(), Value::from(incremental));

        self.cancel().await?;
        self.stores.events.delete(&self.name).await?;
        self.stores
            .runs
            .begin(&self.name, &run_id, Utc::now())
            .await?;
        self.stores
            .queue
            .enqueue(
                Task {
                    crawler: self.name.clone(),
                    run_id: run_id.clone(),
                    stage: self.init.clone(),
                    state,
                },
                self.queue_options(),
            )
            .await?;
        tracing::info!(crawler = %self.name, run_id = %run_id, "run queued");
        Ok(run_id)
    }

    /// Enqueue a follow-on work item for an in-flight run.
    pub(crate) async fn enqueue(
        &self,
        run_id: &RunId,
        stage: &StageName,
        state: FxHashMap<String, Value>,
    ) -> Result<(), StoreError> {
        self.stores
            .queue
            .enqueue(
                Task {
                    crawler: self.name.clone(),
                    run_id: run_id.clone(),
                    stage: stage.clone(),
                    state,
                },
                self.queue_options(),
            )
            .await
    }

    /// Abort all active runs and flush queued work. Idempotent; cancelling
    /// a crawler with no active run is a no-op.
    #[instrument(skip(self), fields(crawler = %self.name), err)]
    pub async fn cancel(&self) -> Result<(), StoreError> {
        let aborted = self.stores.runs.abort_all(&self.name).await?;
        let flushed = self.stores.queue.flush(&self.name).await?;
        if aborted > 0 || flushed > 0 {
            tracing::info!(
                crawler = %self.name,
                aborted,
                flushed,
                "cancelled active runs"
            );
        }
        Ok(())
    }

    /// Irreversibly delete all runtime data for this crawler: queue
    /// entries, events, and run history.
    #[instrument(skip(self), fields(crawler = %self.name), err)]
    pub async fn flush(&self) -> Result<(), StoreError> {
        try_join!(
            self.stores.queue.flush(&self.name),
            self.stores.events.delete(&self.name),
            self.stores.runs.flush(&self.name),
        )?;
        Ok(())
    }

    /// Delete this crawler's diagnostic events, keeping queue and run data.
    pub async fn flush_events(&self) -> Result<(), StoreError> {
        self.stores.events.delete(&self.name).await?;
        Ok(())
    }

    /// Whether any work item for this crawler is queued or being processed.
    pub async fn is_running(&self) -> Result<bool, StoreError> {
        self.stores.queue.is_pending(&self.name).await
    }

    /// Start time of the most recent run.
    pub async fn last_run(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.stores.runs.last_run(&self.name).await
    }

    /// Total operations performed across all runs of this crawler.
    pub async fn op_count(&self) -> Result<u64, StoreError> {
        self.stores.runs.op_count(&self.name).await
    }

    /// Run history, most recent first.
    pub async fn runs(&self) -> Result<Vec<RunRecord>, StoreError> {
        self.stores.runs.runs(&self.name).await
    }

    /// Run id of the most recently started run.
    pub async fn latest_run_id(&self) -> Result<Option<RunId>, StoreError> {
        self.stores.runs.latest_run_id(&self.name).await
    }

    pub(crate) fn stores(&self) -> &Stores {
        &self.stores
    }
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("disabled", &self.disabled)
            .field("stages", &self.stage_order)
            .finish()
    }
}

impl std::fmt::Display for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
