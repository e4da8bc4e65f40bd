#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod error;
pub mod handler;
pub mod middleware;
pub mod service;

use axum::error_handling::HandleErrorLayer;
use axum::Router;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub use service::ServiceState;

/// Tracing target for request-level observability events.
pub const TRACING_TARGET_OBSERVABILITY: &str = "sheetbuilder_server::observability";

/// Builds the full application router with middleware applied in the order
/// documented in [`middleware`]: recovery (outermost) wraps observability,
/// which wraps security, which wraps the routes themselves (innermost).
///
/// Recovery is built as one `ServiceBuilder` rather than three separate
/// `Router::layer` calls: `TimeoutLayer`'s service has a `BoxError` error
/// type, which only `HandleErrorLayer` (not `Router::layer`, which requires
/// `Error: Into<Infallible>`) can absorb, so `HandleErrorLayer` must be the
/// outermost layer of the same builder that applies the timeout.
pub fn create_router(state: ServiceState) -> Router {
    let recovery = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(middleware::handle_timeout_error))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT));

    Router::new()
        .merge(handler::routes())
        .layer(recovery)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(middleware::MAX_BODY_BYTES))
        .with_state(state)
}
