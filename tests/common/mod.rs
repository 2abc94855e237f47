#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use spinneret::context::Context;
use spinneret::handler::{Emitted, HandlerError, HandlerRegistry, StageHandler};
use spinneret::manager::CrawlerManager;
use spinneret::settings::Settings;
use spinneret::stores::Stores;

/// Minimal single-stage crawler on a daily schedule.
pub const SINGLE_STAGE_DOC: &str = r#"
schedule: daily
pipeline:
  init:
    method: noop
"#;

/// Three-stage pipeline: seed fans into fetch, fetch into store.
pub const PIPELINE_DOC: &str = r#"
name: books
schedule: daily
pipeline:
  init:
    method: seed
    handle:
      fetch: fetch
  fetch:
    method: http_get
    handle:
      store: store
  store:
    method: store_doc
"#;

/// Handler that does nothing and emits nothing.
pub struct Noop;

#[async_trait]
impl StageHandler for Noop {
    async fn process(&self, _ctx: &mut Context) -> Result<Vec<Emitted>, HandlerError> {
        Ok(vec![])
    }
}

/// Handler that emits a single output with one state entry.
pub struct EmitValue {
    pub rule: String,
    pub key: String,
    pub value: String,
}

#[async_trait]
impl StageHandler for EmitValue {
    async fn process(&self, _ctx: &mut Context) -> Result<Vec<Emitted>, HandlerError> {
        Ok(vec![
            Emitted::new(self.rule.clone()).with_value(self.key.clone(), self.value.clone())
        ])
    }
}

/// Handler that records `stage:url` for every item it sees, optionally
/// emitting one routed output.
#[derive(Clone)]
pub struct Recording {
    pub seen: Arc<Mutex<Vec<String>>>,
    pub emit_rule: Option<String>,
}

impl Recording {
    pub fn new(emit_rule: Option<&str>) -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            emit_rule: emit_rule.map(str::to_string),
        }
    }
}

#[async_trait]
impl StageHandler for Recording {
    async fn process(&self, ctx: &mut Context) -> Result<Vec<Emitted>, HandlerError> {
        let url = ctx
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("-")
            .to_string();
        self.seen.lock().push(format!("{}:{url}", ctx.stage().name()));
        Ok(match &self.emit_rule {
            Some(rule) => vec![Emitted::new(rule.clone())],
            None => vec![],
        })
    }
}

/// Handler that always fails.
pub struct Failing;

#[async_trait]
impl StageHandler for Failing {
    async fn process(&self, _ctx: &mut Context) -> Result<Vec<Emitted>, HandlerError> {
        Err(HandlerError::Failed("simulated handler failure".into()))
    }
}

/// Registry covering the handler ids used by the fixture documents.
pub fn noop_registry() -> HandlerRegistry {
    HandlerRegistry::new().with_handler("noop", Noop)
}

/// Build a manager over in-memory stores with the given documents loaded.
///
/// The returned TempDir roots the blob store and must outlive the manager.
pub fn manager_with(
    docs: &[(&str, &str)],
    registry: HandlerRegistry,
) -> (Arc<CrawlerManager>, tempfile::TempDir) {
    spinneret::telemetry::init();
    let tmp = tempfile::tempdir().expect("tempdir");
    let settings = Settings::from_env().with_data_path(tmp.path());
    let mut manager = CrawlerManager::new(settings, registry, Stores::in_memory());
    for (source_name, doc) in docs {
        manager.load_crawler(doc, source_name).expect("load crawler");
    }
    (Arc::new(manager), tmp)
}
