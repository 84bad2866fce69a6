// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ipfs_gateway::{respond, GatewayState, Opts};
use minhttp::request::Origin;
use minhttp::signal::{fast_shutdown_requested, graceful_shutdown_requested};
use minhttp::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let opts = Opts::parse();
    let state = Arc::new(GatewayState::from_opts(&opts)?);
    let origin = Origin::http(&opts.default_host)
        .with_context(|| format!("invalid default host {:?}", opts.default_host))?;

    let address = opts.address();
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("couldn't listen on {address}"))?;
    info!("Listening on {address}");
    let connections = futures::stream::unfold(listener, |listener| async {
        Some((listener.accept().await, listener))
    });

    let server = Server::new(opts.max_connections).with_origin(origin);
    let run = server.serve(connections, move |request| respond(state.clone(), request));

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
