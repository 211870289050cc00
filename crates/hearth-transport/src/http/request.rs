//! Decoded HTTP requests handed to route handlers.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use hearth_core::PathParams;
use serde_json::Value;
use thiserror::Error;

/// Request body after decoding by content type.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body was sent.
    #[default]
    Empty,
    /// `application/json` (or `+json`) body.
    Json(Value),
    /// `text/*` body.
    Text(String),
    /// Any other content type.
    Bytes(Bytes),
}

/// Errors produced by body decoding. Each answers the request directly.
#[derive(Debug, Error)]
pub enum BodyError {
    /// The body exceeded the configured limit or could not be read.
    #[error("request body exceeds {limit} bytes")]
    TooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The body was declared as JSON but did not parse.
    #[error("malformed JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The body was declared as text but is not UTF-8.
    #[error("text body is not valid UTF-8")]
    InvalidText,
}

impl IntoResponse for BodyError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidJson(_) | Self::InvalidText => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// A request as seen by route handlers.
///
/// Carries the parameters captured by the matching route pattern and the
/// decoded body.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    params: PathParams,
    body: RequestBody,
}

impl RouteRequest {
    /// Creates a request with no headers and no body.
    ///
    /// An unparsable `uri` falls back to `/`.
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: Uri::try_from(uri).unwrap_or_default(),
            headers: HeaderMap::new(),
            remote_addr: None,
            params: PathParams::default(),
            body: RequestBody::Empty,
        }
    }

    /// Decodes an axum request, reading at most `limit` body bytes.
    pub async fn from_http(req: Request, limit: usize) -> Result<Self, BodyError> {
        let (parts, body) = req.into_parts();

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(BodyError::TooLarge { limit });
        }

        let bytes = axum::body::to_bytes(body, limit)
            .await
            .map_err(|_| BodyError::TooLarge { limit })?;
        let body = decode_body(&parts.headers, bytes)?;
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            remote_addr,
            params: PathParams::default(),
            body,
        })
    }

    /// Replaces the headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the body.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Sets the peer address.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the path component of the URI.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the raw query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Parameters captured by the route pattern that accepted this request.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Shorthand for `params().get(name)`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Deserialises a JSON body into `T`.
    ///
    /// A non-JSON body is treated as `null`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.body {
            RequestBody::Json(value) => T::deserialize(value),
            _ => T::deserialize(&Value::Null),
        }
    }

    /// Returns a text body.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            RequestBody::Text(text) => Some(text),
            _ => None,
        }
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }
}

fn decode_body(headers: &HeaderMap, bytes: Bytes) -> Result<RequestBody, BodyError> {
    if bytes.is_empty() {
        return Ok(RequestBody::Empty);
    }
    let essence = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if essence == "application/json" || essence.ends_with("+json") {
        Ok(RequestBody::Json(serde_json::from_slice(&bytes)?))
    } else if essence.starts_with("text/") {
        String::from_utf8(bytes.to_vec())
            .map(RequestBody::Text)
            .map_err(|_| BodyError::InvalidText)
    } else {
        Ok(RequestBody::Bytes(bytes))
    }
}
