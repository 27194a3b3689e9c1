//! Tracing initialization for the CLI and hosted phases.
//!
//! Phases, the store, and the sweeper log structured fields (`pipeline_id`,
//! counts, phase names) through `tracing`; this module wires a subscriber.
//! Filtering follows `RUST_LOG` when set, with an explicit directive string
//! taking precedence.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Call once at startup; a second call
/// reports an error rather than panicking.
pub fn init(directives: Option<&str>) -> anyhow::Result<()> {
    let filter = match directives {
        Some(d) => EnvFilter::try_new(d).context("failed to parse log filter")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}
