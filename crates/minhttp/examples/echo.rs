// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streams request bodies straight back to the client.
//!
//! Try `curl -T some-big-file http://localhost:8080/`.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use minhttp::request::CanonicalRequest;
use minhttp::response::{self, CanonicalResponse, StatusCode};
use minhttp::signal::{fast_shutdown_requested, graceful_shutdown_requested};
use minhttp::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let address = SocketAddr::from(([0, 0, 0, 0], 8080));
    info!("Listening on {address}");
    let listener = TcpListener::bind(address).await?;
    let connections = futures::stream::unfold(listener, |listener| async {
        Some((listener.accept().await, listener))
    });

    let max_connections = 2;
    let server = Server::new(max_connections);

    let run = server.serve(connections, respond);

    let graceful_shutdown = async {
        if let Err(err) = graceful_shutdown_requested().await {
            info!("Can't listen for graceful shutdown: {err}");
            return;
        }
        info!("Graceful shutdown requested...");
        server.graceful_shutdown().await;
    };

    let run_until_gracefully_shutdown = async { tokio::join!(run, graceful_shutdown) };

    tokio::select! {
        _ = run_until_gracefully_shutdown => {}
        result = fast_shutdown_requested() => {
            result?;
            info!("Fast shutdown requested...");
        }
    };
    Ok(())
}

async fn respond(request: CanonicalRequest) -> anyhow::Result<CanonicalResponse> {
    Ok(match request.body {
        Some(body) => response::stream(StatusCode::OK, "application/octet-stream", body),
        None => response::text(StatusCode::OK, "Hello world!\n"),
    })
}
