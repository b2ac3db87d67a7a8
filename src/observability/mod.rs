//! Observability for tierdb
//!
//! - Structured logging goes through `tracing`; each lifecycle log line
//!   carries an `event` field named by [`Event`]
//! - Counters live in [`MetricsRegistry`]
//!
//! Observability is read-only: nothing here influences engine behavior.
//!
//! ```ignore
//! tracing::info!(event = Event::CheckpointComplete.as_str(), sequence, "checkpoint complete");
//! metrics.increment_checkpoints();
//! ```

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Install a `tracing` subscriber filtered by the `TIERDB_LOG` environment
/// variable (default `info`). Used by the binary; embedders install their
/// own subscriber.
pub fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("TIERDB_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // A subscriber may already be installed (tests, embedding applications)
    let _ = if json {
        registry
            .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
}
