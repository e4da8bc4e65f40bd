//! Middleware stack, applied outermost to innermost as:
//!
//! Recovery (panic/timeout safety net) → Observability (request tracing) →
//! Security (CORS, request body limits) → routes.
//!
//! This mirrors the layering order of larger Axum services this crate grew
//! out of, trimmed down to the concerns a single-purpose upload/download API
//! actually needs: there is no authentication layer (no per-user accounts)
//! and no metrics layer (out of scope). [`crate::create_router`] wires these
//! constants into concrete `tower`/`tower-http` layers, outermost first.

use std::time::Duration;

use axum::response::IntoResponse;

use crate::error::{Error, ErrorKind};

/// 512 MiB, comfortably above the legacy endpoint's large-file threshold so
/// the body limit never masks the registry's own size gate.
pub const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

/// Upper bound on total request handling time, including composition
/// submission (not the composition job itself, which runs detached).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub(crate) async fn handle_timeout_error(err: tower::BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        return Error::new(ErrorKind::InternalServerError)
            .with_message("request timed out")
            .into_response();
    }
    Error::new(ErrorKind::InternalServerError)
        .with_message(format!("unhandled error: {err}"))
        .into_response()
}
