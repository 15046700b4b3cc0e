//! Core system types and foundations
//!
//! This module contains the fundamental building blocks of the graph store,
//! including record types, id encoding, error handling and configuration.

pub mod config;
pub mod error;
pub mod ids;
pub mod types;

// Re-export commonly used items
pub use config::Config;
pub use error::{ErrorBody, GraphError, Result};
pub use ids::IdCodec;
pub use types::{EdgeRecord, EventRecord, Fields, Method, ObjectRecord};
