//! Domain-level error types shared by the registry, broker, and composition worker.
//!
//! This module provides error handling for everything below the HTTP boundary:
//!
//! - Strongly-typed error kinds matching the error taxonomy of the job-processing
//!   subsystem
//! - Builder pattern for ergonomic error construction
//! - Type-safe error source tracking with boxed trait objects
//! - Integration with `thiserror` for automatic `Display` and `Error` trait impls

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// Type alias for boxed errors that are Send + Sync.
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Result type alias for domain-level operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error kind enumeration for categorizing domain-level errors.
///
/// Mirrors the error kinds of the job-processing subsystem: a malformed
/// submission is [`ErrorKind::Validation`], a legacy-endpoint size gate is
/// [`ErrorKind::PolicyRejection`], a failure to persist an upload is
/// [`ErrorKind::Storage`], a failure during sheet composition is
/// [`ErrorKind::Processing`], and a lookup against an unknown jobId is
/// [`ErrorKind::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request: missing file, wrong content type, out-of-range rotation.
    Validation,
    /// Legacy synchronous endpoint rejecting an oversize upload.
    PolicyRejection,
    /// Cannot persist or read an upload or output file.
    Storage,
    /// Any error raised while composing the output sheet document.
    Processing,
    /// Lookup against an unknown jobId or fingerprint.
    NotFound,
    /// Internal service logic errors not covered by the above.
    Internal,
}

impl ErrorKind {
    /// Returns the error kind as a string for categorization.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::PolicyRejection => "policy_rejection",
            Self::Storage => "storage",
            Self::Processing => "processing",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-level error with structured information.
#[derive(Debug, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    #[source]
    source: Option<BoxedError>,
}

impl Error {
    #[inline]
    fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches a source error to this error, enabling error chain tracking.
    #[inline]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    #[must_use]
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Creates a new validation error.
    #[inline]
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Creates a new policy-rejection error (legacy size gate).
    #[inline]
    pub fn policy_rejection(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::PolicyRejection, message)
    }

    /// Creates a new storage error.
    #[inline]
    pub fn storage(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Creates a new processing error (raised during sheet composition).
    #[inline]
    pub fn processing(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Processing, message)
    }

    /// Creates a new not-found error.
    #[inline]
    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Creates a new internal error.
    #[inline]
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = Error::validation("rotationAngle out of range");
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.message(), "rotationAngle out of range");
    }

    #[test]
    fn test_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "upload missing");
        let error = Error::storage("cannot read staged upload").with_source(source);

        assert!(StdError::source(&error).is_some());
        assert_eq!(error.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_processing_error() {
        let error = Error::processing("first page exceeds max sheet height");
        assert_eq!(error.kind(), ErrorKind::Processing);
        assert!(error.to_string().contains("first page exceeds"));
    }

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::Validation.as_str(), "validation");
        assert_eq!(ErrorKind::PolicyRejection.as_str(), "policy_rejection");
        assert_eq!(ErrorKind::Storage.as_str(), "storage");
        assert_eq!(ErrorKind::Processing.as_str(), "processing");
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
        assert_eq!(ErrorKind::Internal.as_str(), "internal");
    }
}
