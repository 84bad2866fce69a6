// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning a handler's eventual result into exactly one response

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::error;

use crate::response::{self, CanonicalResponse};

/// Wait for `pending` and hand the outcome to `write`, exactly once.
///
/// A handler's result may already be available or may take a while; either way it's a future,
/// so there's a single path through here. If the handler succeeds, its response goes to
/// `write`. If it fails (or panics), the details are logged and `write` receives a generic
/// 500 response instead, so nothing internal leaks to the client. `write` is an [`FnOnce`] and
/// exactly one branch calls it, so no request is answered twice or left unanswered.
pub async fn complete<F, E, W, T>(pending: F, write: W) -> T
where
    F: Future<Output = Result<CanonicalResponse, E>>,
    E: Into<anyhow::Error>,
    W: FnOnce(CanonicalResponse) -> T,
{
    let response = match AssertUnwindSafe(pending).catch_unwind().await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            let err = err.into();
            error!("Handler failed: {err:#}");
            response::internal_error()
        }
        Err(panic) => {
            error!("Handler panicked: {}", panic_message(&*panic));
            response::internal_error()
        }
    };
    write(response)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "(non-string panic payload)"
    }
}
