use std::time::Duration;

use spinneret::scheduler::Scheduler;
use spinneret::worker::Worker;

mod common;
use common::*;

#[tokio::test]
async fn triggers_due_crawlers_once() {
    let (manager, _tmp) = manager_with(&[("due", SINGLE_STAGE_DOC)], noop_registry());
    let crawler = manager.get(&"due".into()).unwrap();
    let scheduler = Scheduler::new(manager.clone());

    assert_eq!(scheduler.evaluate_once().await, 1);
    assert!(crawler.is_running().await.unwrap());
    assert!(crawler.latest_run_id().await.unwrap().is_some());

    // Still running, so a second sweep does not re-trigger.
    assert_eq!(scheduler.evaluate_once().await, 0);
}

#[tokio::test]
async fn skips_disabled_and_unscheduled_crawlers() {
    let disabled = "schedule: daily\ndisabled: true\npipeline:\n  init:\n    method: noop\n";
    let manual = "pipeline:\n  init:\n    method: noop\n";
    let (manager, _tmp) = manager_with(
        &[("off", disabled), ("manual", manual), ("on", SINGLE_STAGE_DOC)],
        noop_registry(),
    );
    let scheduler = Scheduler::new(manager.clone());

    assert_eq!(scheduler.evaluate_once().await, 1);
    assert!(!manager.get(&"off".into()).unwrap().is_running().await.unwrap());
    assert!(!manager.get(&"manual".into()).unwrap().is_running().await.unwrap());
    assert!(manager.get(&"on".into()).unwrap().is_running().await.unwrap());
}

#[tokio::test]
async fn fresh_run_not_retriggered_within_interval() {
    let (manager, _tmp) = manager_with(&[("daily", SINGLE_STAGE_DOC)], noop_registry());
    let crawler = manager.get(&"daily".into()).unwrap();
    let scheduler = Scheduler::new(manager.clone());
    let worker = Worker::new(manager.clone());

    assert_eq!(scheduler.evaluate_once().await, 1);
    worker.drain().await.unwrap();
    assert!(!crawler.is_running().await.unwrap());

    // The run just completed; the daily interval has not elapsed.
    assert_eq!(scheduler.evaluate_once().await, 0);
    assert_eq!(crawler.runs().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn spawned_scheduler_triggers_on_its_tick() {
    let (manager, _tmp) = manager_with(&[("ticked", SINGLE_STAGE_DOC)], noop_registry());
    let crawler = manager.get(&"ticked".into()).unwrap();

    let handle = Scheduler::new(manager.clone())
        .with_tick(Duration::from_millis(10))
        .spawn();

    let mut waited = Duration::ZERO;
    while !crawler.is_running().await.unwrap() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    handle.stop().await;

    assert!(crawler.is_running().await.unwrap());
}
