use spinneret::config::ConfigError;
use spinneret::types::{Schedule, StageName};

mod common;
use common::*;

#[tokio::test]
async fn load_applies_defaults() {
    let (manager, _tmp) = manager_with(&[("minimal", SINGLE_STAGE_DOC)], noop_registry());
    let crawler = manager.get(&"minimal".into()).expect("loaded");

    assert_eq!(crawler.name().as_str(), "minimal");
    assert_eq!(crawler.description(), "minimal");
    assert_eq!(crawler.category(), "scrape");
    assert_eq!(crawler.schedule(), Some(Schedule::Daily));
    assert!(!crawler.disabled());
    assert!(!crawler.stealthy());
    assert_eq!(crawler.init_stage(), &StageName::from("init"));
    assert_eq!(crawler.delay_secs(), 0);
    // Default expiry is the settings value in days, scaled to seconds.
    assert_eq!(crawler.expire_secs() % 86_400, 0);
}

#[tokio::test]
async fn document_name_overrides_source_name() {
    let (manager, _tmp) = manager_with(
        &[(
            "file-stem",
            "name: override\npipeline:\n  init:\n    method: noop\n",
        )],
        noop_registry(),
    );
    assert!(manager.get(&"override".into()).is_some());
    assert!(manager.get(&"file-stem".into()).is_none());
}

#[tokio::test]
async fn stages_keep_document_order() {
    let (manager, _tmp) = manager_with(
        &[("books", PIPELINE_DOC)],
        spinneret::handler::HandlerRegistry::new()
            .with_handler("seed", Noop)
            .with_handler("http_get", Noop)
            .with_handler("store_doc", Noop),
    );
    let crawler = manager.get(&"books".into()).expect("loaded");
    let order: Vec<&str> = crawler.stages().map(|s| s.name().as_str()).collect();
    assert_eq!(order, vec!["init", "fetch", "store"]);
}

fn load_err(doc: &str) -> ConfigError {
    let mut manager = spinneret::manager::CrawlerManager::new(
        spinneret::settings::Settings::from_env(),
        noop_registry(),
        spinneret::stores::Stores::in_memory(),
    );
    manager.load_crawler(doc, "bad").expect_err("should fail")
}

#[tokio::test]
async fn rejects_empty_pipeline() {
    assert!(matches!(
        load_err("schedule: daily\n"),
        ConfigError::EmptyPipeline { .. }
    ));
}

#[tokio::test]
async fn rejects_unknown_init_stage() {
    let doc = "init: launch\npipeline:\n  init:\n    method: noop\n";
    assert!(matches!(
        load_err(doc),
        ConfigError::UnknownInitStage { init, .. } if init == "launch"
    ));
}

#[tokio::test]
async fn rejects_unknown_handler() {
    let doc = "pipeline:\n  init:\n    method: no_such_handler\n";
    assert!(matches!(
        load_err(doc),
        ConfigError::UnknownHandler { handler, .. } if handler == "no_such_handler"
    ));
}

#[tokio::test]
async fn rejects_unknown_route_target() {
    let doc = "pipeline:\n  init:\n    method: noop\n    handle:\n      next: missing\n";
    assert!(matches!(
        load_err(doc),
        ConfigError::UnknownRouteTarget { target, .. } if target == "missing"
    ));
}

#[tokio::test]
async fn rejects_invalid_schedule_value() {
    assert!(matches!(
        load_err("schedule: fortnightly\npipeline:\n  init:\n    method: noop\n"),
        ConfigError::Yaml { .. }
    ));
}

#[tokio::test]
async fn load_directory_skips_invalid_documents() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("good.yml"), SINGLE_STAGE_DOC).unwrap();
    std::fs::write(dir.path().join("bad.yml"), "pipeline:\n  init:\n    method: nope\n").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();

    let settings = spinneret::settings::Settings::from_env();
    let mut manager = spinneret::manager::CrawlerManager::new(
        settings,
        noop_registry(),
        spinneret::stores::Stores::in_memory(),
    );
    let loaded = manager.load_directory(dir.path()).expect("readable dir");
    assert_eq!(loaded, 1);
    assert!(manager.get(&"good".into()).is_some());
    assert!(manager.get(&"bad".into()).is_none());
}
