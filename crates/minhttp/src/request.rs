// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical requests and their translation from incoming HTTP requests

use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use http::header::HOST;
use http::uri::{Authority, InvalidUri, PathAndQuery, Scheme};
use http::{HeaderMap, Method, Request, Uri};
use hyper::body::Body;
use pin_project::pin_project;

use crate::pump::{pump, BufferFull, BufferSink, PumpError};

/// Per-request identifier, taken from the `X-Request-ID` header when the client supplies
/// exactly one, otherwise freshly generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub const FIELD: &'static str = "x-request-id";

    pub fn new_unique() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl From<&HeaderMap> for RequestId {
    fn from(headers: &HeaderMap) -> Self {
        let mut req_ids = headers.get_all(Self::FIELD).iter();
        req_ids
            .next()
            .filter(|_| req_ids.next().is_none())
            .and_then(|r_id| r_id.to_str().ok())
            .filter(|r_id| !r_id.is_empty())
            .map(|r_id| Self(r_id.to_owned()))
            .unwrap_or_else(Self::new_unique)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where requests arrive: the listener's scheme and the authority assumed when a request has no
/// usable `Host` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: Scheme,
    pub default_authority: Authority,
}

impl Origin {
    /// Plain-HTTP origin falling back to `default_host` (e.g. `localhost:3000`).
    pub fn http(default_host: &str) -> Result<Self, InvalidUri> {
        Ok(Self {
            scheme: Scheme::HTTP,
            default_authority: default_host.parse()?,
        })
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self {
            scheme: Scheme::HTTP,
            default_authority: Authority::from_static("localhost"),
        }
    }
}

/// A request body that's read lazily from the connection.
///
/// Consuming the body drains the connection it came from, so it's moved into whatever reads it
/// and can't be read twice.
pub struct RequestBody(BoxStream<'static, Result<Bytes, anyhow::Error>>);

impl RequestBody {
    /// Wrap an arbitrary stream of chunks.
    pub fn from_stream<S, E>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        Self(chunks.map_err(Into::<anyhow::Error>::into).boxed())
    }

    /// Wrap an already complete body.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let chunk = Ok::<_, anyhow::Error>(bytes.into());
        Self::from_stream(futures::stream::iter([chunk]))
    }

    /// Read the whole body into memory, failing once it exceeds `limit` bytes.
    pub async fn read_to_bytes(
        self,
        limit: usize,
    ) -> Result<Bytes, PumpError<anyhow::Error, BufferFull>> {
        let mut buffer = BufferSink::new(limit);
        pump(self, &mut buffer).await?;
        Ok(buffer.into_bytes())
    }
}

impl Stream for RequestBody {
    type Item = Result<Bytes, anyhow::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_next_unpin(cx)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestBody(..)")
    }
}

/// A request as seen by application code, independent of the connection it arrived on.
#[derive(Debug)]
pub struct CanonicalRequest {
    pub id: RequestId,
    pub method: Method,
    /// Absolute target, always using the listener's scheme.
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Absent for `GET` and `HEAD`.
    pub body: Option<RequestBody>,
    pub peer: SocketAddr,
}

impl CanonicalRequest {
    /// The target's path, e.g. `/ipfs/cat/Qm...`.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Percent-decoded value of the first query parameter called `name`, if present.
    pub fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        let query = self.uri.query()?;
        form_urlencoded::parse(query.as_bytes())
            .find_map(|(key, value)| (key == name).then_some(value))
    }
}

/// Convert a request delivered by the connection into a [`CanonicalRequest`].
///
/// The target URI is rebuilt from `origin`'s scheme, the `Host` header (or
/// `origin.default_authority` if it's missing or unusable) and the request's path and query.
/// Headers are carried over untouched, including repeated ones. Bodies of `GET` and `HEAD`
/// requests are ignored; other bodies are wrapped, not read.
pub fn translate<B>(request: Request<B>, origin: &Origin, peer: SocketAddr) -> CanonicalRequest
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<anyhow::Error>,
{
    let (parts, body) = request.into_parts();
    let uri = target_uri(origin, &parts.headers, &parts.uri);
    let body = match parts.method {
        Method::GET | Method::HEAD => None,
        _ => Some(RequestBody::from_stream(DataFrames(body))),
    };
    CanonicalRequest {
        id: RequestId::from(&parts.headers),
        method: parts.method,
        uri,
        headers: parts.headers,
        body,
        peer,
    }
}

fn target_uri(origin: &Origin, headers: &HeaderMap, uri: &Uri) -> Uri {
    let authority = headers
        .get(HOST)
        .and_then(|host| Authority::try_from(host.as_bytes()).ok())
        .unwrap_or_else(|| origin.default_authority.clone());
    let path_and_query = uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    let mut parts = http::uri::Parts::default();
    parts.scheme = Some(origin.scheme.clone());
    parts.authority = Some(authority);
    parts.path_and_query = Some(path_and_query.clone());
    Uri::from_parts(parts).unwrap_or_else(|_| Uri::from(path_and_query))
}

/// Data frames of a [`Body`], skipping trailers.
#[pin_project]
struct DataFrames<B>(#[pin] B);

impl<B: Body> Stream for DataFrames<B> {
    type Item = Result<B::Data, B::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            return Poll::Ready(match ready!(this.0.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    let Ok(data) = frame.into_data() else {
                        continue;
                    };
                    Some(Ok(data))
                }
                Some(Err(err)) => Some(Err(err)),
                None => None,
            });
        }
    }
}
