//! HTTP-facing error envelope, translating [`sheetbuilder_core::ErrorKind`]
//! into a status code and the wire error shape of spec.md's §6 error
//! responses (`{success:false, message, ...}`).
//!
//! This is the HTTP-aware counterpart to `sheetbuilder_core::Error`: the
//! domain crates never know about status codes, and this module never knows
//! about composition or fingerprints, only about rendering a domain error or
//! a handler-local validation failure as a `Response`.

use std::borrow::Cow;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Enumeration of HTTP error kinds this server ever returns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 400 Bad Request — malformed multipart submission or out-of-range field.
    BadRequest,
    /// 409 Conflict — legacy endpoint blocking an oversize upload.
    Conflict,
    /// 404 Not Found — unknown jobId, or no matching output file.
    NotFound,
    /// 500 Internal Server Error — storage or composition failure.
    #[default]
    InternalServerError,
}

impl ErrorKind {
    /// Returns the HTTP status code for this error kind.
    #[inline]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn default_message(self) -> &'static str {
        match self {
            Self::BadRequest => "the request could not be processed due to invalid data",
            Self::Conflict => "the request conflicts with the current state of the resource",
            Self::NotFound => "the requested resource was not found",
            Self::InternalServerError => "an internal server error occurred",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.status_code())
    }
}

/// Maps a domain error kind onto its HTTP counterpart (spec.md §7).
impl From<sheetbuilder_core::ErrorKind> for ErrorKind {
    fn from(kind: sheetbuilder_core::ErrorKind) -> Self {
        use sheetbuilder_core::ErrorKind as Domain;
        match kind {
            Domain::Validation => Self::BadRequest,
            Domain::PolicyRejection => Self::Conflict,
            Domain::NotFound => Self::NotFound,
            Domain::Storage | Domain::Processing | Domain::Internal => Self::InternalServerError,
        }
    }
}

/// The error type returned by every fallible handler in this crate.
#[derive(Clone)]
#[must_use = "errors do nothing unless turned into a response"]
pub struct Error<'a> {
    kind: ErrorKind,
    message: Option<Cow<'a, str>>,
    required_endpoint: Option<&'static str>,
}

impl Error<'static> {
    /// Creates a new error with the specified kind and no message override.
    #[inline]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            required_endpoint: None,
        }
    }

    /// Attaches the `requiredEndpoint` field the legacy `/process` gate
    /// reports alongside its 409 (spec.md §6).
    #[inline]
    pub fn with_required_endpoint(mut self, endpoint: &'static str) -> Self {
        self.required_endpoint = Some(endpoint);
        self
    }
}

impl<'a> Error<'a> {
    /// Overrides the default message for this error kind.
    #[inline]
    pub fn with_message(self, message: impl Into<Cow<'a, str>>) -> Self {
        Self {
            message: Some(message.into()),
            ..self
        }
    }

    /// Returns the error kind.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the custom message, if one was set.
    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Converts this error into a static version by cloning borrowed data.
    pub fn into_static(self) -> Error<'static> {
        Error {
            kind: self.kind,
            message: self.message.map(|m| Cow::Owned(m.into_owned())),
            required_endpoint: self.required_endpoint,
        }
    }
}

impl fmt::Debug for Error<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("status", &self.kind.status_code())
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for Error<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message.as_deref().unwrap_or(self.kind.default_message()))
    }
}

impl std::error::Error for Error<'_> {}

/// Translates a domain-level error into its HTTP counterpart, reusing the
/// domain error's message as the response message.
impl From<sheetbuilder_core::Error> for Error<'static> {
    fn from(err: sheetbuilder_core::Error) -> Self {
        Self::new(err.kind().into()).with_message(err.message().to_string())
    }
}

impl From<ErrorKind> for Error<'static> {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "requiredEndpoint")]
    required_endpoint: Option<&'static str>,
}

impl IntoResponse for Error<'_> {
    fn into_response(self) -> Response {
        let status = self.kind.status_code();
        let message = self
            .message
            .map(Cow::into_owned)
            .unwrap_or_else(|| self.kind.default_message().to_string());
        let body = ErrorBody {
            success: false,
            message,
            required_endpoint: self.required_endpoint,
        };
        (status, Json(body)).into_response()
    }
}

/// A specialized `Result` for HTTP handlers in this crate.
pub type Result<T, E = Error<'static>> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_kind() {
        assert_eq!(ErrorKind::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::InternalServerError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn domain_kind_maps_to_http_kind() {
        assert_eq!(ErrorKind::from(sheetbuilder_core::ErrorKind::Validation), ErrorKind::BadRequest);
        assert_eq!(ErrorKind::from(sheetbuilder_core::ErrorKind::PolicyRejection), ErrorKind::Conflict);
        assert_eq!(ErrorKind::from(sheetbuilder_core::ErrorKind::NotFound), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from(sheetbuilder_core::ErrorKind::Storage), ErrorKind::InternalServerError);
        assert_eq!(ErrorKind::from(sheetbuilder_core::ErrorKind::Processing), ErrorKind::InternalServerError);
    }

    #[test]
    fn with_message_overrides_default() {
        let error = Error::new(ErrorKind::NotFound).with_message("no such jobId");
        assert_eq!(error.message(), Some("no such jobId"));
    }

    #[test]
    fn domain_error_conversion_preserves_message() {
        let domain = sheetbuilder_core::Error::validation("rotationAngle out of range");
        let http: Error<'static> = domain.into();
        assert_eq!(http.kind(), ErrorKind::BadRequest);
        assert_eq!(http.message(), Some("rotationAngle out of range"));
    }

    #[test]
    fn into_static_clones_borrowed_message() {
        let owned = String::from("borrowed message");
        let error = Error::new(ErrorKind::BadRequest).with_message(owned.as_str());
        let static_error = error.into_static();
        drop(owned);
        assert_eq!(static_error.message(), Some("borrowed message"));
    }
}
