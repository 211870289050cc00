//! Transport and dispatch error types.

use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use hearth_core::PatternError;
use thiserror::Error;
use tower::BoxError;

use crate::http::RouteId;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised while registering resources or running the server.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// I/O error (bind, accept, local address).
    #[error("I/O error: {0}")]
    Io(String),

    /// A live server already owns this address.
    #[error("a server is already bound to {addr}")]
    AlreadyBound {
        /// The requested bind address.
        addr: String,
    },

    /// A registration pattern failed to compile.
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Per-request routing failures.
///
/// These never affect the route table or other requests; each maps to a
/// status code through [`IntoResponse`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No route pattern matches the path.
    #[error("no route matches {method} {path}")]
    NotFound {
        /// Request method.
        method: Method,
        /// Request path.
        path: String,
    },

    /// The path matches but no matching entry accepts the method.
    #[error("method {method} not allowed for {path}")]
    MethodNotAllowed {
        /// Request method.
        method: Method,
        /// Request path.
        path: String,
        /// Union of the methods accepted by the entries matching the path.
        allowed: Vec<Method>,
    },

    /// The accepted handler chain returned an error or panicked.
    #[error("handler for route {route} failed: {source}")]
    HandlerFailure {
        /// The route whose chain failed.
        route: RouteId,
        /// The handler's error.
        #[source]
        source: BoxError,
    },
}

impl DispatchError {
    /// Returns the HTTP status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::HandlerFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Formats a method list for an `Allow` header.
pub(crate) fn allow_header(methods: &[Method]) -> HeaderValue {
    let joined = methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    HeaderValue::from_str(&joined).unwrap_or_else(|_| HeaderValue::from_static(""))
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = status.canonical_reason().unwrap_or("Error");
        match self {
            Self::MethodNotAllowed { allowed, .. } => {
                (status, [(header::ALLOW, allow_header(&allowed))], reason).into_response()
            }
            _ => (status, reason).into_response(),
        }
    }
}

/// Result type for route dispatch.
pub type DispatchResult<T> = Result<T, DispatchError>;
