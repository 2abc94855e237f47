//! Two-phase loading of crawl definition documents.
//!
//! Phase one parses YAML into loosely-validated, strictly-typed
//! intermediates ([`CrawlerConfig`], [`StageConfig`]). Phase two — in
//! [`Crawler::load`](crate::crawler::Crawler::load) — validates the
//! pipeline graph against the handler registry and only then constructs
//! the immutable crawler. A document that fails either phase is rejected
//! with a [`ConfigError`] and never registered.
//!
//! Recognized top-level keys: `name`, `description`, `category`,
//! `schedule`, `disabled`, `init`, `delay`, `expire` (days), `stealthy`,
//! `pipeline`. Each pipeline stage names its handler (`method`), optional
//! `params`, and its output routing (`handle: {label: stage}`).

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::Schedule;

/// Malformed or inconsistent crawl definition. Fatal at load time.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read crawl definition {path}: {source}")]
    #[diagnostic(code(spinneret::config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in crawl definition: {source}")]
    #[diagnostic(
        code(spinneret::config::yaml),
        help("Check indentation and the recognized top-level keys.")
    )]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("crawler {crawler:?} has an empty pipeline")]
    #[diagnostic(
        code(spinneret::config::empty_pipeline),
        help("Declare at least one stage under `pipeline:`.")
    )]
    EmptyPipeline { crawler: String },

    #[error("crawler {crawler:?} pipeline has a non-string stage name")]
    #[diagnostic(code(spinneret::config::stage_key))]
    InvalidStageKey { crawler: String },

    #[error("crawler {crawler:?}: init stage {init:?} is not in the pipeline")]
    #[diagnostic(
        code(spinneret::config::unknown_init),
        help("Point `init:` at a declared stage, or declare an `init` stage.")
    )]
    UnknownInitStage { crawler: String, init: String },

    #[error("crawler {crawler:?}: stage {stage:?} routes label {label:?} to unknown stage {target:?}")]
    #[diagnostic(code(spinneret::config::unknown_route))]
    UnknownRouteTarget {
        crawler: String,
        stage: String,
        label: String,
        target: String,
    },

    #[error("crawler {crawler:?}: stage {stage:?} names unregistered handler {handler:?}")]
    #[diagnostic(
        code(spinneret::config::unknown_handler),
        help("Register the handler before loading crawl definitions.")
    )]
    UnknownHandler {
        crawler: String,
        stage: String,
        handler: String,
    },
}

/// Strictly-typed intermediate for one pipeline stage.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Handler id, resolved against the registry at load time.
    pub method: String,
    /// Free-form parameters handed to the handler.
    #[serde(default)]
    pub params: FxHashMap<String, Value>,
    /// Output routing: handler label to downstream stage name.
    #[serde(default)]
    pub handle: FxHashMap<String, String>,
}

/// Strictly-typed intermediate for a whole crawl document.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CrawlerConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub disabled: bool,
    pub init: Option<String>,
    /// Seconds to hold queued work back before dispatch.
    #[serde(default)]
    pub delay: u64,
    /// Days after which queued work is stale; defaults from settings.
    pub expire: Option<u64>,
    /// Hint consumed by downstream fetch stages.
    #[serde(default)]
    pub stealthy: bool,
    /// Raw pipeline mapping; kept as a YAML mapping to preserve the
    /// document's stage order.
    #[serde(default)]
    pub pipeline: serde_yaml::Mapping,
}

impl CrawlerConfig {
    /// Parse a YAML crawl document.
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(document)?)
    }

    /// The pipeline in document order as (stage name, stage config) pairs.
    pub fn stages(&self, crawler: &str) -> Result<Vec<(String, StageConfig)>, ConfigError> {
        let mut stages = Vec::with_capacity(self.pipeline.len());
        for (key, value) in &self.pipeline {
            let name = key
                .as_str()
                .ok_or_else(|| ConfigError::InvalidStageKey {
                    crawler: crawler.to_string(),
                })?
                .to_string();
            let stage: StageConfig = serde_yaml::from_value(value.clone())?;
            stages.push((name, stage));
        }
        Ok(stages)
    }
}
