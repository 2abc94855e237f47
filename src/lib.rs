//! # Spinneret: declarative web-crawl orchestration
//!
//! Spinneret turns a YAML description of a scraping pipeline — a directed
//! graph of named stages — into scheduled, durable, cancellable crawl runs.
//! The engine owns orchestration only: stage handlers (fetch, parse, store)
//! are opaque capabilities registered by the embedding application, and the
//! work queue, run history, and event log live in shared stores so any
//! number of worker processes can cooperate on the same crawls.
//!
//! ## Core Concepts
//!
//! - **Crawler**: an immutable crawl definition with a schedule and a stage
//!   graph, loaded from YAML
//! - **Stage**: one named step, bound to a handler id and a routing table
//! - **Run**: one execution of a crawler, tracked in the run store
//! - **Task**: a queued work item naming a target stage and carrying state
//! - **Context**: the per-task state handed to a handler, serializable for
//!   the trip through the queue
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use spinneret::context::Context;
//! use spinneret::handler::{Emitted, HandlerError, HandlerRegistry, StageHandler};
//! use spinneret::manager::CrawlerManager;
//! use spinneret::scheduler::Scheduler;
//! use spinneret::settings::Settings;
//! use spinneret::stores::Stores;
//! use spinneret::worker::Worker;
//!
//! struct Seed;
//!
//! #[async_trait]
//! impl StageHandler for Seed {
//!     async fn process(&self, ctx: &mut Context) -> Result<Vec<Emitted>, HandlerError> {
//!         ctx.info("seeding").await?;
//!         Ok(vec![Emitted::new("fetch").with_value("url", "https://example.com")])
//!     }
//! }
//!
//! # async fn example(fetch: impl StageHandler + 'static, store: impl StageHandler + 'static) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = HandlerRegistry::new()
//!     .with_handler("seed", Seed)
//!     .with_handler("http_get", fetch)
//!     .with_handler("store", store);
//!
//! let stores = Stores::sqlite("sqlite://spinneret.db").await?;
//! let mut manager = CrawlerManager::new(Settings::from_env(), registry, stores);
//! manager.load_directory("crawlers")?;
//! let manager = Arc::new(manager);
//!
//! let worker = Worker::new(manager.clone()).spawn();
//! let scheduler = Scheduler::new(manager).spawn();
//! // ... run until shutdown ...
//! scheduler.stop().await;
//! worker.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] - Opaque crawler/stage/run identifiers and schedules
//! - [`config`] - Two-phase YAML document loading
//! - [`crawler`] - Crawl definitions and their lifecycle operations
//! - [`stage`] - Stage identity and output routing
//! - [`handler`] - The stage handler trait and registry
//! - [`context`] - Per-task execution context and the blob store
//! - [`stores`] - Work queue, run store, and event store contracts
//! - [`worker`] - The dequeue/dispatch loop
//! - [`scheduler`] - Periodic due-ness evaluation
//! - [`manager`] - Definition loading and shared infrastructure
//! - [`settings`] - Process-wide defaults from the environment
//! - [`telemetry`] - Tracing subscriber setup

pub mod config;
pub mod context;
pub mod crawler;
pub mod handler;
pub mod manager;
pub mod scheduler;
pub mod settings;
pub mod stage;
pub mod stores;
pub mod telemetry;
pub mod types;
pub mod worker;
