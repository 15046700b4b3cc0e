//! Graph Store - a schema-driven graph object store
//!
//! Typed objects and named directed edges are validated against a declarative
//! per-type schema, unique field values are reserved across objects, and every
//! accepted mutation is recorded as an ordered change event that is persisted
//! and then published to an optional queue.
//!
//! The same service runs on interchangeable storage backends (in-memory and
//! SQLite) with identical observable behaviour.
#![warn(missing_docs)]

// Core foundational modules
pub mod core;
pub mod schema;

// Main functional modules
pub mod api;
pub mod graph;
pub mod storage;
pub mod system;

// Re-export commonly used items for convenience
pub use crate::core::{Config, GraphError, Result};
pub use graph::GraphService;
pub use schema::SchemaRegistry;

use crate::core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing and metrics.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this twice
/// is harmless; the second subscriber is ignored.
pub fn init(logging: &LoggingConfig) -> Result<()> {
    init_logging(logging);
    tracing::info!("Initializing {} v{}", NAME, VERSION);
    system::metrics::init_registry();
    Ok(())
}

/// Install the global tracing subscriber
pub fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let _ = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.pretty().try_init(),
    };
}
