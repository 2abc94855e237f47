use std::time::Duration;

use spinneret::handler::HandlerRegistry;
use spinneret::stores::{EventLevel, Task, TaskOptions};
use spinneret::types::RunId;
use spinneret::worker::Worker;

mod common;
use common::*;

#[tokio::test]
async fn drains_a_single_stage_run() {
    let (manager, _tmp) = manager_with(&[("simple", SINGLE_STAGE_DOC)], noop_registry());
    let crawler = manager.get(&"simple".into()).unwrap();
    let worker = Worker::new(manager.clone());

    let run_id = crawler.run(None, None).await.unwrap();
    assert!(crawler.is_running().await.unwrap());

    assert_eq!(worker.drain().await.unwrap(), 1);

    assert!(!crawler.is_running().await.unwrap());
    assert_eq!(crawler.op_count().await.unwrap(), 1);
    let runs = crawler.runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, run_id);
    assert_eq!(runs[0].operations, 1);
    assert!(runs[0].ended_at.is_some());
    assert!(!runs[0].aborted);
}

#[tokio::test]
async fn cancel_after_completion_leaves_history_untouched() {
    let (manager, _tmp) = manager_with(&[("finished", SINGLE_STAGE_DOC)], noop_registry());
    let crawler = manager.get(&"finished".into()).unwrap();
    let worker = Worker::new(manager.clone());

    crawler.run(None, None).await.unwrap();
    worker.drain().await.unwrap();
    let completed = crawler.runs().await.unwrap().remove(0);
    assert!(completed.ended_at.is_some());
    assert!(!completed.aborted);

    // Cancelling with no active run must not rewrite the completed record;
    // a fresh run() calls cancel() first, so history would otherwise rot.
    crawler.cancel().await.unwrap();
    assert_eq!(crawler.runs().await.unwrap(), vec![completed.clone()]);

    crawler.run(None, None).await.unwrap();
    let record = crawler
        .runs()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.run_id == completed.run_id)
        .unwrap();
    assert!(!record.aborted);
    assert_eq!(record.ended_at, completed.ended_at);
}

#[tokio::test]
async fn pipeline_threads_state_between_stages() {
    let fetch = Recording::new(Some("store"));
    let store = Recording::new(None);
    let registry = HandlerRegistry::new()
        .with_handler(
            "seed",
            EmitValue {
                rule: "fetch".to_string(),
                key: "url".to_string(),
                value: "https://books.example/catalog".to_string(),
            },
        )
        .with_handler("http_get", fetch.clone())
        .with_handler("store_doc", store.clone());
    let (manager, _tmp) = manager_with(&[("books", PIPELINE_DOC)], registry);
    let crawler = manager.get(&"books".into()).unwrap();
    let worker = Worker::new(manager.clone());

    crawler.run(None, None).await.unwrap();
    assert_eq!(worker.drain().await.unwrap(), 3);

    // The url emitted by the seed stage travels through fetch into store.
    assert_eq!(
        fetch.seen.lock().as_slice(),
        ["fetch:https://books.example/catalog"]
    );
    assert_eq!(
        store.seen.lock().as_slice(),
        ["store:https://books.example/catalog"]
    );

    assert_eq!(crawler.op_count().await.unwrap(), 3);
    assert!(!crawler.is_running().await.unwrap());
    assert!(crawler.runs().await.unwrap()[0].ended_at.is_some());
}

#[tokio::test]
async fn handler_failure_is_recorded_and_contained() {
    let registry = HandlerRegistry::new().with_handler("noop", Failing);
    let (manager, _tmp) = manager_with(&[("brittle", SINGLE_STAGE_DOC)], registry);
    let crawler = manager.get(&"brittle".into()).unwrap();
    let worker = Worker::new(manager.clone());

    crawler.run(None, None).await.unwrap();
    assert_eq!(worker.drain().await.unwrap(), 1);

    // The failed item is consumed, its operation counted, and the failure
    // captured as an error event rather than a worker crash.
    assert!(!crawler.is_running().await.unwrap());
    assert_eq!(crawler.op_count().await.unwrap(), 1);

    let events = manager.stores().events.list(crawler.name()).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, EventLevel::Error);
    assert!(events[0].message.contains("simulated handler failure"));
    assert_eq!(
        events[0].payload,
        Some(serde_json::json!({ "handler": "noop" }))
    );
}

#[tokio::test]
async fn superseded_run_tasks_are_discarded() {
    let handler = Recording::new(None);
    let registry = HandlerRegistry::new().with_handler("noop", handler.clone());
    let (manager, _tmp) = manager_with(&[("raced", SINGLE_STAGE_DOC)], registry);
    let crawler = manager.get(&"raced".into()).unwrap();
    let stores = manager.stores();
    let worker = Worker::new(manager.clone());

    // Plant a run, then supersede it, then let a straggler task for the old
    // run surface as if another worker had enqueued it before cancellation.
    let old_run = crawler.run(None, None).await.unwrap();
    let new_run = crawler.run(None, None).await.unwrap();
    stores
        .queue
        .enqueue(
            Task {
                crawler: crawler.name().clone(),
                run_id: old_run,
                stage: crawler.init_stage().clone(),
                state: Default::default(),
            },
            TaskOptions::default(),
        )
        .await
        .unwrap();

    // Both the straggler and the live init task are consumed, but only the
    // live run's task reaches its handler.
    assert_eq!(worker.drain().await.unwrap(), 2);
    assert_eq!(handler.seen.lock().len(), 1);
    assert_eq!(crawler.op_count().await.unwrap(), 1);
    assert_eq!(crawler.latest_run_id().await.unwrap(), Some(new_run));
}

#[tokio::test]
async fn tasks_for_unknown_crawlers_are_dropped() {
    let (manager, _tmp) = manager_with(&[("known", SINGLE_STAGE_DOC)], noop_registry());
    let stores = manager.stores();
    let worker = Worker::new(manager.clone());

    stores
        .queue
        .enqueue(
            Task {
                crawler: "phantom".into(),
                run_id: RunId::generate(),
                stage: "init".into(),
                state: Default::default(),
            },
            TaskOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(worker.drain().await.unwrap(), 1);
    assert!(!stores.queue.is_pending(&"phantom".into()).await.unwrap());
}

#[tokio::test]
async fn unrouted_output_labels_are_dropped() {
    let registry = HandlerRegistry::new().with_handler(
        "noop",
        EmitValue {
            rule: "nowhere".to_string(),
            key: "url".to_string(),
            value: "ignored".to_string(),
        },
    );
    let (manager, _tmp) = manager_with(&[("dead-end", SINGLE_STAGE_DOC)], registry);
    let crawler = manager.get(&"dead-end".into()).unwrap();
    let worker = Worker::new(manager.clone());

    crawler.run(None, None).await.unwrap();
    // The init stage has no `handle` table, so the emitted label cannot
    // route anywhere; no successor is enqueued.
    assert_eq!(worker.drain().await.unwrap(), 1);
    assert!(!crawler.is_running().await.unwrap());
    assert_eq!(crawler.op_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn spawned_worker_drains_in_the_background() {
    let (manager, _tmp) = manager_with(&[("bg", SINGLE_STAGE_DOC)], noop_registry());
    let crawler = manager.get(&"bg".into()).unwrap();

    crawler.run(None, None).await.unwrap();
    let handle = Worker::new(manager.clone())
        .with_poll_interval(Duration::from_millis(10))
        .spawn();

    let mut waited = Duration::ZERO;
    while crawler.is_running().await.unwrap() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    handle.stop().await;

    assert!(!crawler.is_running().await.unwrap());
    assert_eq!(crawler.op_count().await.unwrap(), 1);
}
