//! Structured logging initialization for fogid binaries.
//!
//! Log level is configured through `RUST_LOG`; without it both initializers
//! default to `info`. Attestation code never logs secret material, so the
//! output is safe to ship to an aggregator.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize human-readable logging.
///
/// # Example
/// ```no_run
/// use fogid_core::logging;
///
/// logging::init();
/// tracing::info!("server starting");
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Initialize JSON logging for log-aggregation pipelines.
pub fn init_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true))
        .init();
}
