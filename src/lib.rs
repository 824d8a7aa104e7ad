pub mod agents;
pub mod analysis;
pub mod config;
pub mod db;
pub mod extraction;
pub mod llm;
pub mod models;
pub mod validation;

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `fallback_filter`.
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing(fallback_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_filter))
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
