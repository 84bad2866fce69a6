// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`Server`]-related things

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use http::HeaderValue;
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::{service_fn, HttpService};
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::bridge;
use crate::request::{translate, CanonicalRequest, Origin, RequestId};
use crate::response::CanonicalResponse;
use crate::writer;

/// Serves HTTP connections while allowing for graceful shutdowns.
pub struct Server {
    concurrent_requests: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    origin: Origin,
}

impl Server {
    /// Create a new [`Server`].
    ///
    /// `max_connections` is the maximum number of simultaneous connections that may be handled
    /// across all [`serve`](Self::serve) calls before they start responding with 503s.
    pub fn new(max_connections: usize) -> Self {
        let concurrent_requests = Arc::new(Semaphore::new(max_connections));
        let (shutdown, _) = watch::channel(false);
        Self {
            concurrent_requests,
            shutdown,
            origin: Origin::default(),
        }
    }

    /// Use `origin` to build the target URI of requests; see [`translate`].
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Serve incoming `connections` with `responder`.
    ///
    /// `connections` is a stream of connection-like objects, and `responder` maps
    /// [`CanonicalRequest`]s to eventual [`CanonicalResponse`]s. Each connection is handled in its
    /// own asynchronous task. Every request on a connection gets exactly one response: if
    /// `responder` fails or panics, the client receives a generic 500 (see
    /// [`bridge::complete`]). Each response carries the request's [`RequestId`].
    ///
    /// [`serve`](Self::serve) will resolve after [`graceful_shutdown`](Self::graceful_shutdown)
    /// has been called (or `connections` is exhausted) and this invocation has no ongoing
    /// connections.
    ///
    /// If the [`Server`] is already at its `max_connections` limit (see [`new`](Self::new)),
    /// new connections will be served with a single minimal 503 response.
    ///
    /// If [`graceful_shutdown`](Self::graceful_shutdown) is called, `connections` will be
    /// dropped before waiting for in-progress connections to finish up.
    ///
    /// # Cancel Safety
    ///
    /// Canceling aborts all connections handled by this call to [`serve`](Self::serve).
    /// Connections handled by other [`serve`](Self::serve) calls are unaffected. Aborting a
    /// connection means abruptly closing it.
    pub async fn serve<P, C, R, F, E>(&self, connections: P, responder: R)
    where
        P: Stream<Item = std::io::Result<(C, SocketAddr)>>,
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        R: Fn(CanonicalRequest) -> F + Clone + Send + Sync + 'static,
        F: Future<Output = Result<CanonicalResponse, E>> + Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        let respond = move |request: CanonicalRequest| {
            let respond = responder.clone();
            let request_span = info_span!("request", id = %request.id);
            async move {
                info!("Request: {} {}", request.method, request.uri);
                let id = request.id.clone();
                let mut response = bridge::complete(respond(request), writer::write).await;
                let headers = response.headers_mut();
                if !headers.contains_key(RequestId::FIELD) {
                    if let Ok(id) = HeaderValue::from_str(&id.0) {
                        headers.insert(RequestId::FIELD, id);
                    }
                }
                info!("Response: {}", response.status());
                response
            }
            .instrument(request_span)
        };

        // This shutdown receiver is what keeps graceful_shutdown from returning so
        // we need it to be the first thing created so it's the last thing destroyed.
        let mut shutdown_receiver = self.shutdown.subscribe();
        let mut was_shutdown = pin!(shutdown_receiver.wait_for(|&done| done).map(|_| None));

        async fn either<T>(f1: impl Future<Output = T>, f2: impl Future<Output = T>) -> T {
            select! {
                biased; // necessary to guarantee we don't handle connections if already shut down
                x1 = f1 => x1,
                x2 = f2 => x2,
            }
        }

        let mut connection_tasks = JoinSet::new();

        info!("Started serving");

        // scope is only to force `connections` to  be dropped
        {
            let mut connections = pin!(connections);
            while let Some(accepted) = either(&mut was_shutdown, connections.next()).await {
                reap(&mut connection_tasks);

                let (connection, peer_addr) = match accepted {
                    Ok(a) => a,
                    Err(err) => {
                        error!("Couldn't accept connection: {err}");
                        continue;
                    }
                };

                let connection_span = info_span!("connection", addr=%peer_addr);
                async {
                    info!("Connected.");
                    let log_guard = Guard(Some(|| info!("Disconnected.")));

                    let permit = match self.concurrent_requests.clone().try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            warn!("Too overloaded; sending minimal 503.");
                            let _ = respond_with_temporarily_unavailable(connection).await;
                            return;
                        }
                    };

                    let respond = respond.clone();
                    let origin = self.origin.clone();
                    let service = service_fn(move |request: Request<Incoming>| {
                        let request = translate(request, &origin, peer_addr);
                        respond(request).map(Ok::<_, Infallible>)
                    });
                    let mut shutdown_receiver = self.shutdown.subscribe();
                    let connection_task = async move {
                        let wants_shutdown = shutdown_receiver.wait_for(|&done| done);
                        let _permit = permit;
                        let _log_guard = log_guard;

                        let http_connection = http1::Builder::new()
                            .half_close(true)
                            .serve_connection(TokioIo::new(connection), service);
                        let http_connection =
                            with_graceful_shutdown(http_connection, wants_shutdown);

                        if let Err(err) = http_connection.await {
                            error!("Error serving: {err}");
                        }
                    };
                    connection_tasks.spawn(connection_task.instrument(Span::current()));
                }
                .instrument(connection_span.or_current())
                .await;
            }
        }

        while let Some(finished) = connection_tasks.join_next().await {
            log_task_failure(finished);
        }
        info!("Stopped serving");
    }

    /// Gracefully shuts down server.
    ///
    /// New calls to [`serve`](Self::serve) resolve immediately without handling new connections.
    /// Existing calls to [`serve`](Self::serve) drop their stream of connections, then wait for
    /// their ongoing connections finish before resolving. All connections terminate as soon as
    /// their current request finishes (idle connections are terminated immediately).
    /// [`graceful_shutdown`](Self::graceful_shutdown) resolves as soon all current calls to
    /// [`serve`](Self::serve) are resolved or aborted.
    ///
    /// # Cancel Safety
    ///
    /// After this has been polled, canceling does not stop the shutdown.
    pub async fn graceful_shutdown(&self) {
        // Inform all requests that a graceful shutdown has been requested
        self.shutdown.send_replace(true);
        // Ensures we exit all serve() calls, not just finish requests.
        self.shutdown.closed().await;
    }
}

/// Drop bookkeeping for connection tasks that already finished.
fn reap(connection_tasks: &mut JoinSet<()>) {
    while let Some(finished) = connection_tasks.try_join_next() {
        log_task_failure(finished);
    }
}

fn log_task_failure(finished: Result<(), tokio::task::JoinError>) {
    if let Err(err) = finished {
        error!("Connection task failed: {err}");
    }
}

/// Cheaply responds to an HTTP 1 connection with a minimal 503.
async fn respond_with_temporarily_unavailable(
    mut connection: impl AsyncWriteExt + Unpin,
) -> std::io::Result<()> {
    // Skip parsing the request entirely (RFC 9110 section 7.5 allows answering early) and
    // don't wait long on a slow client.
    let write_response = async {
        let msg = b"HTTP/1.1 503 Service Unavailable\r\n\
                    Content-Type: text/plain;charset=utf-8\r\n\
                    Content-Length: 22\r\n\
                    \r\n\
                    Too many connections!\n";
        connection.write_all(msg).await?;
        connection.shutdown().await
    };
    select! {
         result = write_response => result,
         _ = sleep(Duration::from_secs(1)) => Err(std::io::ErrorKind::TimedOut.into()),
    }
}

/// Gracefully terminate `connection` if `want_shutdown` resolves.
async fn with_graceful_shutdown<I, S, B>(
    connection: http1::Connection<I, S>,
    want_shutdown: impl Future,
) -> Result<(), hyper::Error>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + 'static,
    S: HttpService<Incoming, ResBody = B>,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B: Body + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    // Both polling a connection and gracefully shutting it down require exclusive
    // access, so we have to manually call them in poll_fn.
    let mut connection = pin!(connection);
    let mut want_shutdown = pin!(want_shutdown.fuse());
    std::future::poll_fn(|cx| {
        if want_shutdown.as_mut().poll(cx).is_ready() {
            connection.as_mut().graceful_shutdown();
        }
        connection.as_mut().poll(cx)
    })
    .await
}

// Small enough code that I don't want to bother pulling in scopeguard
struct Guard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Guard<F> {
    fn drop(&mut self) {
        if let Some(callback) = self.0.take() {
            callback();
        }
    }
}
