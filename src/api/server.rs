//! HTTP server implementation for the graph API

use axum::{
    http::{header::CONTENT_TYPE, HeaderName, Method},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{self, AppState, AUTHOR_HEADER};
use crate::graph::GraphService;

/// Creates the application router with all routes and middleware
pub fn create_app(service: Arc<GraphService>, metrics_enabled: bool) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(AUTHOR_HEADER)])
        .allow_origin(Any);

    let state = AppState {
        service,
        metrics_enabled,
    };

    Router::new()
        // System routes
        .route("/v1/graph", get(handlers::get_graph).post(handlers::create_object))
        .route("/v1/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        // Object routes
        .route(
            "/v1/graph/:id",
            get(handlers::get_objects)
                .put(handlers::update_object)
                .delete(handlers::delete_object),
        )
        // Edge routes
        .route("/v1/graph/:id/:edge_name", get(handlers::get_edge_objects))
        .route(
            "/v1/graph/:id/:edge_name/:dst",
            get(handlers::get_edge_object)
                .post(handlers::create_edge)
                .delete(handlers::delete_edge),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the HTTP server and run until `shutdown` resolves
pub async fn start_server(
    addr: SocketAddr,
    service: Arc<GraphService>,
    metrics_enabled: bool,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_app(service, metrics_enabled);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Graph definition available at http://{}/v1/graph", addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    Ok(())
}
