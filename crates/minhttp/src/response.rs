// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Response-related helpers

use std::fmt;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http_body_util::combinators::UnsyncBoxBody;
pub use http::StatusCode;

/// Holds a [`CanonicalResponse`], possibly wrapped in an [`ErrResponse`].
///
/// See [`ErrResponse`] for example use.
pub type ResponseResult = Result<CanonicalResponse, ErrResponse>;

/// Type-erased HTTP response, as handed to the connection.
pub type GenericResponse = http::Response<UnsyncBoxBody<Bytes, anyhow::Error>>;

/// Wrapper that lets handlers bail out early with a finished response via `?`.
///
/// # Examples
///
/// ```
/// use minhttp::request::CanonicalRequest;
/// use minhttp::response::{self, ErrResponse, ResponseResult, StatusCode};
///
/// fn require_json(request: &CanonicalRequest) -> ResponseResult {
///     let content_type = request
///         .headers
///         .get("content-type")
///         .ok_or_else(|| ErrResponse(response::text(StatusCode::BAD_REQUEST, "No content type")))?;
///     if content_type != "application/json" {
///         return Err(ErrResponse(response::text(
///             StatusCode::UNSUPPORTED_MEDIA_TYPE,
///             "Expected JSON",
///         )));
///     }
///     Ok(response::json(StatusCode::OK, r#"{"ok":true}"#))
/// }
/// ```
pub struct ErrResponse(pub CanonicalResponse);

/// Body of a [`CanonicalResponse`].
pub enum ResponseBody {
    /// No body bytes at all.
    Empty,
    /// A body that's already in memory.
    Full(Bytes),
    /// A body produced incrementally; see [`crate::writer`] for how it's delivered.
    Stream(BoxStream<'static, Result<Bytes, anyhow::Error>>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(bytes) => f.debug_tuple("Full").field(bytes).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A response as produced by application code.
///
/// Writing a response consumes it, so a response can be sent at most once.
#[derive(Debug)]
pub struct CanonicalResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl CanonicalResponse {
    /// Response with `status`, no headers and no body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }

    /// Add a header value, keeping any values already present for `name`.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }
}

/// Return an empty 200 response.
pub fn empty() -> CanonicalResponse {
    CanonicalResponse::new(StatusCode::OK)
}

/// Return a [`CanonicalResponse`] with known content.
pub fn full(
    status: StatusCode,
    content_type: &'static str,
    content: impl ToString,
) -> CanonicalResponse {
    CanonicalResponse::new(status)
        .with_header(CONTENT_TYPE, HeaderValue::from_static(content_type))
        .with_body(ResponseBody::Full(content.to_string().into()))
}

/// Return a plain text response with known content.
pub fn text(status: StatusCode, content: impl ToString) -> CanonicalResponse {
    let content_type = "text/plain; charset=utf-8";
    full(status, content_type, content)
}

/// Return a JSON response with known content.
pub fn json(status: StatusCode, content: impl ToString) -> CanonicalResponse {
    let content_type = "application/json";
    full(status, content_type, content)
}

/// Return a response whose body is streamed from `chunks` as they're produced.
pub fn stream<S, E>(status: StatusCode, content_type: &'static str, chunks: S) -> CanonicalResponse
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
{
    let chunks = chunks.map_err(Into::<anyhow::Error>::into).boxed();
    CanonicalResponse::new(status)
        .with_header(CONTENT_TYPE, HeaderValue::from_static(content_type))
        .with_body(ResponseBody::Stream(chunks))
}

/// Return a plain text "404 not found" response with appropriate status code
pub fn not_found() -> CanonicalResponse {
    text(StatusCode::NOT_FOUND, "404 not found")
}

/// Return a plain text 500 response that reveals nothing about what went wrong.
pub fn internal_error() -> CanonicalResponse {
    text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}
