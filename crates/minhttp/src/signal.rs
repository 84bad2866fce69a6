// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shutdown signal detection
//!
//! **BEWARE:** Everything here alters process state by _permanently_ registering signal
//! handlers through [`tokio`]. As such, these should only be called near the entry point to a
//! program, not by a library. Also, the usual caveats around signals apply; they may only be
//! detected after registration, multiple signals may be collapsed, etc.

use tokio::signal::ctrl_c;

/// Resolves when a graceful shutdown has been requested, i.e. on the first `SIGINT`.
///
/// Fails if the handler can't be registered.
pub async fn graceful_shutdown_requested() -> std::io::Result<()> {
    ctrl_c().await
}

/// Resolves when a fast shutdown has been requested.
///
/// Things that constitute a request for a fast shutdown:
///
/// * Multiple `SIGINT`s
/// * At least one `SIGTERM`
///
/// Fails if a handler can't be registered.
pub async fn fast_shutdown_requested() -> std::io::Result<()> {
    let repeated_interrupt = async {
        ctrl_c().await?;
        ctrl_c().await
    };
    tokio::select! {
        result = repeated_interrupt => result,
        result = terminated() => result,
    }
}

#[cfg(unix)]
async fn terminated() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

// Windows doesn't have an equivalent to SIGTERM.
#[cfg(not(unix))]
async fn terminated() -> std::io::Result<()> {
    std::future::pending().await
}

// Registering a signal handler is permanent and global, which destroys test isolation, so these
// are exercised by hand through the `echo` example instead of automated tests.
