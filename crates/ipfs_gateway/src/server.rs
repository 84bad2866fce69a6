// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use http::{HeaderMap, Method};
use serde_json::json;

use minhttp::request::CanonicalRequest;
use minhttp::response::{self, CanonicalResponse, StatusCode};

use crate::error::GatewayError;
use crate::identity::{authenticate, AuthResult};
use crate::ipfs;
use crate::state::GatewayState;

const HEALTH_MESSAGE: &str = "IPFS gateway running";

#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Health,
    Add,
    Cat { cid: &'a str },
    Protected,
    NotFound,
}

fn route<'a>(method: &Method, path: &'a str) -> Route<'a> {
    match (method, path) {
        (&Method::GET, "/") => Route::Health,
        (&Method::POST, "/ipfs/add") => Route::Add,
        (_, "/protected") => Route::Protected,
        (&Method::GET, path) => match path.strip_prefix("/ipfs/cat/") {
            Some(cid) if !cid.is_empty() && !cid.contains('/') => Route::Cat { cid },
            _ => Route::NotFound,
        },
        _ => Route::NotFound,
    }
}

/// Answer a gateway request.
pub async fn respond(
    state: Arc<GatewayState>,
    request: CanonicalRequest,
) -> Result<CanonicalResponse, GatewayError> {
    let path = request.path().to_owned();
    match route(&request.method, &path) {
        Route::Health => Ok(health()),
        Route::Add => ipfs::add(&state, request).await,
        Route::Cat { cid } => {
            let raw = request.query_param("format").as_deref() == Some("raw");
            Ok(ipfs::cat(&state, cid, raw).await)
        }
        Route::Protected => Ok(protected(&state, &request.headers).await),
        Route::NotFound => Ok(response::not_found()),
    }
}

fn health() -> CanonicalResponse {
    response::json(StatusCode::OK, json!({ "message": HEALTH_MESSAGE }))
}

/// Report who the request's bearer token belongs to.
///
/// Rejections are ordinary results here, not HTTP errors.
async fn protected(state: &GatewayState, headers: &HeaderMap) -> CanonicalResponse {
    let body = match authenticate(&*state.verifier, headers).await {
        AuthResult::Authenticated { subject } => json!({ "ok": true, "uid": subject }),
        AuthResult::Rejected { reason } => json!({ "ok": false, "reason": reason }),
    };
    response::json(StatusCode::OK, body)
}
