//! Periodic due-ness evaluation for every loaded crawler.
//!
//! The scheduler ticks on a timer, asks each crawler whether it is due
//! (schedule interval elapsed, not disabled, not already running), and
//! triggers `run()` for the due ones. Triggering is at-least-once: there is
//! no persisted tick state, so missed windows are simply detected on the
//! next evaluation via the last-run comparison.
//!
//! One crawler's failure never blocks evaluation of the rest.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::manager::CrawlerManager;

/// Default wall-clock gap between evaluations.
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Periodic trigger for due crawlers.
pub struct Scheduler {
    manager: Arc<CrawlerManager>,
    tick: Duration,
}

/// Handle to a spawned scheduler task.
pub struct SchedulerHandle {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the scheduler loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(manager: Arc<CrawlerManager>) -> Self {
        Self {
            manager,
            tick: DEFAULT_TICK,
        }
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Evaluate every crawler once, triggering runs for the due ones.
    ///
    /// Returns the number of crawlers triggered. A crawler whose due check
    /// or `run()` fails is logged and skipped; the sweep continues.
    #[instrument(skip(self))]
    pub async fn evaluate_once(&self) -> usize {
        let mut triggered = 0;
        for crawler in self.manager.crawlers() {
            let due = match crawler.check_due().await {
                Ok(due) => due,
                Err(error) => {
                    tracing::warn!(crawler = %crawler.name(), %error, "due check failed");
                    continue;
                }
            };
            if !due {
                continue;
            }
            match crawler.run(None, None).await {
                Ok(run_id) => {
                    tracing::info!(crawler = %crawler.name(), %run_id, "triggered scheduled run");
                    triggered += 1;
                }
                Err(error) => {
                    tracing::warn!(crawler = %crawler.name(), %error, "scheduled run failed to start");
                }
            }
        }
        triggered
    }

    /// Run the evaluation loop on a background task until stopped.
    #[must_use]
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        self.evaluate_once().await;
                    }
                }
            }
        });
        SchedulerHandle {
            shutdown_tx,
            handle,
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("tick", &self.tick).finish()
    }
}
