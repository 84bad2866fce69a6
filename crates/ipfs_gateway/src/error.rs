// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Failures that keep the gateway from producing a meaningful response.
///
/// Anything a client can fix is answered directly instead; these end up as a generic 500.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("couldn't read request body: {0:#}")]
    RequestBody(anyhow::Error),
}
