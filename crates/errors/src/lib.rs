//! A single error taxonomy shared by every crate in this workspace.
//!
//! Business logic returns `anyhow::Result<T>` and tags failures with an
//! [`ErrorMetadata`] via `.context(...)`. The HTTP boundary (see
//! `HttpResponseError` below) downcasts the error chain back to an
//! `ErrorMetadata` exactly once, to decide the status code and user-facing
//! message. Errors with no attached `ErrorMetadata` are treated as
//! `Internal` and never leak their message to the caller.
use std::borrow::Cow;

use axum::response::{
    IntoResponse,
    Response,
};
use http::StatusCode;
use serde::Serialize;

/// The six error kinds named in the serving worker's error handling design.
/// `Conflict` is reserved (unused by any current operation) but kept so
/// callers can match exhaustively against the full taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Unavailable,
    Conflict,
    Internal,
    /// An invariant violation. Never surfaced over HTTP: the process that
    /// observes it exits instead (see `status_reporter`), so the control
    /// plane can restart it and trigger snapshot-based catch-up.
    Fatal,
}

impl ErrorCode {
    pub fn http_status_code(self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Attached to an `anyhow::Error` chain via `.context(...)` to classify a
/// failure. The `short_msg` is a stable, ScreamingCamelCase tag usable in
/// tests and metrics; `msg` is the human-readable message.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    pub short_msg: Cow<'static, str>,
    pub msg: Cow<'static, str>,
}

const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
const INTERNAL_SERVER_ERROR_MSG: &str = "An internal server error occurred.";

impl ErrorMetadata {
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn unauthorized(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Unauthorized,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn unavailable(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Unavailable,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Internal,
            short_msg: INTERNAL_SERVER_ERROR.into(),
            msg: msg.into(),
        }
    }

    pub fn fatal(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Fatal,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn operational_internal_server_error() -> Self {
        Self {
            code: ErrorCode::Internal,
            short_msg: INTERNAL_SERVER_ERROR.into(),
            msg: INTERNAL_SERVER_ERROR_MSG.into(),
        }
    }
}

/// Extension methods for classifying an `anyhow::Error` chain that may or
/// may not carry an `ErrorMetadata`.
pub trait ErrorMetadataAnyhowExt {
    fn error_code(&self) -> ErrorCode;
    fn short_msg(&self) -> &str;
    fn user_facing_message(&self) -> String;
    fn is_bad_request(&self) -> bool;
    fn is_fatal(&self) -> bool;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn error_code(&self) -> ErrorCode {
        self.downcast_ref::<ErrorMetadata>()
            .map(|e| e.code)
            .unwrap_or(ErrorCode::Internal)
    }

    fn short_msg(&self) -> &str {
        self.downcast_ref::<ErrorMetadata>()
            .map(|e| e.short_msg.as_ref())
            .unwrap_or(INTERNAL_SERVER_ERROR)
    }

    fn user_facing_message(&self) -> String {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => e.to_string(),
            None => INTERNAL_SERVER_ERROR_MSG.to_string(),
        }
    }

    fn is_bad_request(&self) -> bool {
        self.error_code() == ErrorCode::BadRequest
    }

    fn is_fatal(&self) -> bool {
        self.error_code() == ErrorCode::Fatal
    }
}

/// Wraps an `anyhow::Error` so it can be returned directly from an axum
/// handler as `Result<T, HttpResponseError>`. The conversion happens at the
/// router boundary exactly once; handlers just propagate with `?`.
#[derive(Debug)]
pub struct HttpResponseError(pub anyhow::Error);

impl<E> From<E> for HttpResponseError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    short_msg: String,
    message: String,
}

impl IntoResponse for HttpResponseError {
    fn into_response(self) -> Response {
        let code = self.0.error_code();
        if code == ErrorCode::Fatal {
            // Fatal errors are invariant violations; they should never have
            // been routed through the HTTP boundary. Log loudly and fall
            // back to a plain 500 rather than panicking mid-response.
            tracing::error!(err = ?self.0, "Fatal error reached HTTP boundary");
        } else {
            tracing::warn!(err = ?self.0, short_msg = self.0.short_msg(), "request failed");
        }
        let status = code.http_status_code();
        let body = ErrorBody {
            code: match code {
                ErrorCode::BadRequest => "BadRequest",
                ErrorCode::Unauthorized => "Unauthorized",
                ErrorCode::Unavailable => "Unavailable",
                ErrorCode::Conflict => "Conflict",
                ErrorCode::Internal | ErrorCode::Fatal => "Internal",
            },
            short_msg: self.0.short_msg().to_string(),
            message: self.0.user_facing_message(),
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_maps_to_400() {
        let err: anyhow::Error = anyhow::anyhow!(ErrorMetadata::bad_request("Bad", "nope"));
        assert_eq!(err.error_code(), ErrorCode::BadRequest);
        assert_eq!(
            err.error_code().http_status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn untagged_error_is_internal_and_generic() {
        let err = anyhow::anyhow!("some low-level detail that should not leak");
        assert_eq!(err.error_code(), ErrorCode::Internal);
        assert_eq!(err.user_facing_message(), INTERNAL_SERVER_ERROR_MSG);
    }

    #[test]
    fn fatal_is_distinguishable_from_internal() {
        let err: anyhow::Error = anyhow::anyhow!(ErrorMetadata::fatal("Divergence", "halt"));
        assert!(err.is_fatal());
    }
}
