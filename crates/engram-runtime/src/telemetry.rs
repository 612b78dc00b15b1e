//! Tracing initialisation for embedding processes.
//!
//! Call [`init_tracing`] once at process startup. The filter comes from
//! `RUST_LOG` (default `"info"`); set `ENGRAM_LOG_FORMAT=json` for
//! newline-delimited JSON logs instead of the compact console format.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global `tracing` subscriber.
///
/// Safe to call more than once: later calls are no-ops, so library tests and
/// embedding applications do not fight over the global default.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = std::env::var("ENGRAM_LOG_FORMAT").as_deref() == Ok("json");

    let result = if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!("tracing subscriber already set: {e}");
    }
}
