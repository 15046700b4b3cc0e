//! # API Module
//!
//! HTTP surface over [`crate::graph::GraphService`].
//!
//! ## Endpoints Overview
//!
//! - `GET /v1/graph` - Loaded graph definition
//! - `GET /v1/health` - Health check (storage reachable and initialised)
//! - `GET /v1/graph/{ids}` - Object by id, or page envelope for a comma-joined list
//! - `POST /v1/graph` - Create object from a body carrying `object_type`
//! - `PUT /v1/graph/{id}` - Update object; body is the delta plus optional `delete_fields`
//! - `DELETE /v1/graph/{id}` - Delete object
//! - `GET /v1/graph/{src}/{edge_name}?count&after` - Paginated edge listing
//! - `GET|POST|DELETE /v1/graph/{src}/{edge_name}/{dst}` - Single edge
//! - `GET /metrics` - Prometheus metrics
//!
//! Mutations read the `author` header as the event's user. Errors are
//! returned as `{"code": ..., "message": ...}` with the matching status.

pub mod handlers;
pub mod server;

pub use handlers::{ApiError, AppState};
pub use server::{create_app, start_server};
