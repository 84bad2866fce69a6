// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal tools for bridging HTTP connections to request handlers
//!
//! Incoming requests are translated into [`CanonicalRequest`](request::CanonicalRequest)s,
//! handed to a responder, and whatever it eventually produces is written back through
//! [`writer::write`]. Bodies move in both directions with [`pump::pump`], one chunk at a time.

pub mod bridge;
pub mod pump;
pub mod request;
pub mod response;
pub mod server;
pub mod signal;
pub mod writer;

pub use server::Server;
