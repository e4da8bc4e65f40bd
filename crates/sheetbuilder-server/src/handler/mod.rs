//! HTTP handlers for the PDF sheet composition surface (spec.md §6).

pub mod pdf;

use axum::Router;

use crate::service::ServiceState;

/// Registers every route this server exposes.
pub fn routes() -> Router<ServiceState> {
    pdf::routes()
}
