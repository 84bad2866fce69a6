// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivering [`CanonicalResponse`]s to the connection

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, Sink, StreamExt};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame};
use hyper::Response;
use tracing::{debug, error, Instrument, Span};

use crate::pump::pump;
use crate::response::{CanonicalResponse, GenericResponse, ResponseBody};

/// Convert `response` into what the connection writes out.
///
/// Status and headers are copied as-is; a header with several values goes out as several
/// header lines. Streamed bodies are driven by a [`pump`] task spawned onto the current
/// runtime, feeding the connection through a [`BodySender`] one chunk at a time. If the stream
/// fails partway through, the failure is logged and the connection is aborted; the status line
/// has already gone out, so there's no way left to report it to the client.
pub fn write(response: CanonicalResponse) -> GenericResponse {
    let CanonicalResponse {
        status,
        headers,
        body,
    } = response;

    let body = match body {
        ResponseBody::Empty => Empty::new().map_err(anyhow::Error::from).boxed_unsync(),
        ResponseBody::Full(bytes) => Full::new(bytes).map_err(anyhow::Error::from).boxed_unsync(),
        ResponseBody::Stream(chunks) => {
            let (sender, body) = body_channel();
            let pumping = async move {
                match pump(chunks, sender).await {
                    Ok(len) => debug!("Streamed {len} response bytes"),
                    Err(err) => error!("Aborting response body: {err}"),
                }
            };
            tokio::spawn(pumping.instrument(Span::current()));
            body.boxed_unsync()
        }
    };

    let mut generic = Response::new(body);
    *generic.status_mut() = status;
    *generic.headers_mut() = headers;
    generic
}

/// Create a connected [`BodySender`] / [`ChannelBody`] pair.
///
/// The channel holds no more than one chunk, so the sender only gets to produce the next chunk
/// once the connection has taken the previous one.
pub fn body_channel() -> (BodySender, ChannelBody) {
    let (chunks_tx, chunks_rx) = mpsc::channel(0);
    let (finished_tx, finished_rx) = oneshot::channel();
    let sender = BodySender {
        chunks: chunks_tx,
        finished: Some(finished_tx),
    };
    let body = ChannelBody {
        chunks: chunks_rx,
        finished: Some(finished_rx),
    };
    (sender, body)
}

/// Writing half of a response body channel.
///
/// Closing the sink ends the body normally. Dropping it without closing (e.g. because the
/// producer failed) makes the [`ChannelBody`] report an error, which causes the connection to
/// be torn down rather than presenting a truncated body as complete.
pub struct BodySender {
    chunks: mpsc::Sender<Bytes>,
    finished: Option<oneshot::Sender<()>>,
}

impl Sink<Bytes> for BodySender {
    type Error = mpsc::SendError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().chunks.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, chunk: Bytes) -> Result<(), Self::Error> {
        self.get_mut().chunks.start_send(chunk)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().chunks).poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        if let Some(finished) = this.finished.take() {
            // The body may already be gone; then there's nobody left to tell.
            let _ = finished.send(());
        }
        Pin::new(&mut this.chunks).poll_close(cx)
    }
}

/// Reading half of a response body channel; see [`body_channel`].
pub struct ChannelBody {
    chunks: mpsc::Receiver<Bytes>,
    finished: Option<oneshot::Receiver<()>>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = anyhow::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(chunk) = ready!(this.chunks.poll_next_unpin(cx)) {
            return Poll::Ready(Some(Ok(Frame::data(chunk))));
        }
        let Some(finished) = this.finished.as_mut() else {
            return Poll::Ready(None);
        };
        let finished = ready!(finished.poll_unpin(cx));
        this.finished = None;
        Poll::Ready(match finished {
            Ok(()) => None,
            Err(oneshot::Canceled) => Some(Err(anyhow::anyhow!(
                "response body ended before it was complete"
            ))),
        })
    }

    fn is_end_stream(&self) -> bool {
        self.finished.is_none()
    }
}
