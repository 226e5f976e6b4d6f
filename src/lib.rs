pub mod agent;
pub mod ai;
pub mod cache;
pub mod config;
pub mod device;
pub mod errors;
pub mod interceptor;
pub mod mcp;
pub mod perception;
pub mod scenario;

pub use errors::{PilotError, PilotResult};

/// Installs the default `tracing` subscriber. Embedders with their own
/// subscriber simply skip this.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
