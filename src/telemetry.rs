//! Tracing subscriber setup for binaries and tests.
//!
//! Library code only ever emits through `tracing`; installing a subscriber
//! is the embedding process's choice. `init()` wires the conventional
//! stack: `RUST_LOG`-driven filtering, compact formatting with ANSI color
//! when stderr is a terminal, and span traces on errors.

use std::io::IsTerminal;

use tracing_error::ErrorLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the default subscriber. Idempotent: returns `false` if a
/// global subscriber was already set.
pub fn init() -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .with(ErrorLayer::default())
        .try_init()
        .is_ok()
}
