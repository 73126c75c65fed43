pub mod config;
pub mod embedding;
pub mod guardrail;
pub mod handlers;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod packing;
pub mod search;
pub mod security;
pub mod state;
pub mod synthesis;
pub mod text;
pub mod utils;
pub mod vectorstore;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Extension, Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use state::AppState;

/// Assemble the HTTP surface around a built application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.settings.server.body_limit_bytes;

    let ask_routes = Router::new()
        .route("/ask", post(handlers::ask::ask_handler))
        .route("/ask/stream", post(handlers::ask::ask_stream_handler))
        .layer(middleware::from_fn(
            security::middleware::ip_rate_limit_middleware,
        ))
        .layer(Extension(state.rate_limiters.clone()));

    let ingest_routes = Router::new()
        .route("/ingest/preview", post(handlers::ingest::preview_handler))
        .route("/ingest/publish", post(handlers::ingest::publish_handler))
        .route("/ingest/upload", post(handlers::ingest::upload_handler))
        .route("/ingest/audit", get(handlers::ingest::audit_handler));

    Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .merge(ask_routes)
        .merge(ingest_routes)
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(CatchPanicLayer::new())
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::default().include_headers(false)),
                )
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
}
