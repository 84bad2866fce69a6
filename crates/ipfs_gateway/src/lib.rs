// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An HTTP gateway in front of a content-addressed blob store.
//!
//! Content is stored with `POST /ipfs/add`, fetched with `GET /ipfs/cat/{cid}`, and
//! `/protected` reports who a bearer token belongs to.

pub mod cid;
mod error;
pub mod identity;
mod ipfs;
mod opts;
mod server;
pub mod state;
pub mod storage;
mod text_stream;

pub use error::GatewayError;
pub use ipfs::DEFAULT_TEXT;
pub use opts::Opts;
pub use server::respond;
pub use state::GatewayState;
