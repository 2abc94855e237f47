//! The worker loop: leases queued work items and dispatches stage handlers.
//!
//! Any number of workers — across any number of processes sharing the same
//! stores — run this loop in parallel. Each iteration leases one task,
//! rebuilds the execution context, invokes the stage's handler, and routes
//! whatever it emitted to downstream stages. Cancellation is cooperative:
//! tasks belonging to an aborted or superseded run are discarded at
//! dequeue time, and the aborted flag is re-checked before successors are
//! enqueued, so a handler that was already in flight when its run was
//! cancelled produces no live follow-on work.
//!
//! Handler failures are captured as error events and never crash the
//! worker; only store failures propagate.

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::context::ContextSnapshot;
use crate::handler::Emitted;
use crate::manager::CrawlerManager;
use crate::stores::{Event, EventLevel, LeasedTask, StoreError};

/// Errors that can stop a worker iteration.
///
/// Handler and routing problems are absorbed (logged, recorded as events);
/// a `WorkerError` means the backing stores themselves failed.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkerError {
    #[error(transparent)]
    #[diagnostic(code(spinneret::worker::store))]
    Store(#[from] StoreError),
}

/// A single queue-draining worker.
pub struct Worker {
    manager: Arc<CrawlerManager>,
    poll_interval: Duration,
}

/// Handle to a spawned worker task.
pub struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for the worker to finish its current item.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

impl Worker {
    #[must_use]
    pub fn new(manager: Arc<CrawlerManager>) -> Self {
        let poll_interval = manager.settings().poll_interval;
        Self {
            manager,
            poll_interval,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run the dequeue loop on a background task until stopped.
    #[must_use]
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    processed = self.process_next() => match processed {
                        Ok(true) => {}
                        Ok(false) => tokio::time::sleep(self.poll_interval).await,
                        Err(error) => {
                            tracing::error!(%error, "worker store failure, backing off");
                            tokio::time::sleep(self.poll_interval).await;
                        }
                    }
                }
            }
        });
        WorkerHandle {
            shutdown_tx,
            handle,
        }
    }

    /// Process every currently visible work item, returning how many were
    /// handled. Useful for tests and batch draining.
    pub async fn drain(&self) -> Result<u64, WorkerError> {
        let mut processed = 0;
        while self.process_next().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Lease and process at most one work item.
    ///
    /// Returns `Ok(false)` when no task is currently visible.
    #[instrument(skip(self), err)]
    pub async fn process_next(&self) -> Result<bool, WorkerError> {
        let stores = self.manager.stores();
        let Some(leased) = stores.queue.dequeue().await? else {
            return Ok(false);
        };
        let task = &leased.task;

        let Some(crawler) = self.manager.get(&task.crawler) else {
            tracing::warn!(crawler = %task.crawler, "discarding task for unknown crawler");
            stores.queue.complete(&leased).await?;
            return Ok(true);
        };

        // Cancellation policy: a task whose run was aborted, or whose run is
        // no longer the crawler's latest, is orphaned work and is dropped.
        let aborted = stores.runs.is_aborted(&task.crawler, &task.run_id).await?;
        let superseded = match stores.runs.latest_run_id(&task.crawler).await? {
            Some(latest) => latest != task.run_id,
            None => false,
        };
        if aborted || superseded {
            tracing::debug!(
                crawler = %task.crawler,
                run_id = %task.run_id,
                aborted,
                superseded,
                "discarding orphaned task"
            );
            stores.queue.complete(&leased).await?;
            return Ok(true);
        }

        stores
            .runs
            .record_operation(&task.crawler, &task.run_id)
            .await?;

        self.dispatch(&leased).await?;

        stores.queue.complete(&leased).await?;
        if !stores.queue.is_pending(&task.crawler).await? {
            stores
                .runs
                .mark_ended(&task.crawler, &task.run_id, Utc::now())
                .await?;
            tracing::info!(crawler = %task.crawler, run_id = %task.run_id, "run drained");
        }
        Ok(true)
    }

    /// Invoke the stage handler and route its outputs.
    async fn dispatch(&self, leased: &LeasedTask) -> Result<(), WorkerError> {
        let task = &leased.task;
        let stores = self.manager.stores();

        let snapshot = ContextSnapshot {
            crawler: task.crawler.clone(),
            run_id: task.run_id.clone(),
            stage: task.stage.clone(),
            state: task.state.clone(),
        };
        let mut ctx = match self.manager.context_from_state(snapshot, &task.stage) {
            Ok(ctx) => ctx,
            Err(error) => {
                tracing::warn!(crawler = %task.crawler, stage = %task.stage, %error, "discarding unroutable task");
                return Ok(());
            }
        };

        let handler_id = ctx.stage().handler().to_string();
        let Some(handler) = self.manager.registry().get(&handler_id) else {
            // Load-time validation makes this unreachable unless the task
            // came from a process with a different registry.
            tracing::warn!(crawler = %task.crawler, handler = %handler_id, "discarding task with unregistered handler");
            return Ok(());
        };

        match handler.process(&mut ctx).await {
            Ok(emitted) => {
                let base_state = ctx.state().clone();
                for output in emitted {
                    self.route(&ctx, &base_state, output).await?;
                }
            }
            Err(error) => {
                tracing::warn!(
                    crawler = %task.crawler,
                    stage = %task.stage,
                    run_id = %task.run_id,
                    %error,
                    "stage handler failed"
                );
                let event = Event::new(
                    task.crawler.clone(),
                    task.run_id.clone(),
                    EventLevel::Error,
                    error.to_string(),
                )
                .with_stage(task.stage.clone())
                .with_payload(serde_json::json!({ "handler": handler_id }));
                stores.events.append(event).await?;
            }
        }
        Ok(())
    }

    /// Route one handler output to its downstream stage, unless the run was
    /// cancelled while the handler ran.
    async fn route(
        &self,
        ctx: &crate::context::Context,
        base_state: &FxHashMap<String, Value>,
        output: Emitted,
    ) -> Result<(), WorkerError> {
        let crawler = ctx.crawler();
        let stores = self.manager.stores();

        let Some(target) = ctx.stage().resolve(&output.rule) else {
            tracing::warn!(
                crawler = %crawler.name(),
                stage = %ctx.stage().name(),
                rule = %output.rule,
                "dropping output with unrouted label"
            );
            return Ok(());
        };

        if stores
            .runs
            .is_aborted(crawler.name(), ctx.run_id())
            .await?
        {
            tracing::debug!(
                crawler = %crawler.name(),
                run_id = %ctx.run_id(),
                "run cancelled mid-flight, dropping successor work"
            );
            return Ok(());
        }

        let mut state = base_state.clone();
        state.extend(output.state);
        crawler.enqueue(ctx.run_id(), target, state).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
