// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storing and retrieving content

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use minhttp::pump::{BufferFull, PumpError};
use minhttp::request::CanonicalRequest;
use minhttp::response::{self, CanonicalResponse, ErrResponse, StatusCode};

use crate::cid::ContentId;
use crate::error::GatewayError;
use crate::state::GatewayState;
use crate::storage::StoreError;
use crate::text_stream::json_envelope;

/// Stored when a client doesn't say what to store.
pub const DEFAULT_TEXT: &str = "hello from ipfs_gateway";

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Deserialize)]
struct AddRequest {
    text: Option<String>,
}

/// `{"ok":false,"reason":...}` with `status`.
pub fn failure(status: StatusCode, reason: &str) -> CanonicalResponse {
    response::json(status, json!({ "ok": false, "reason": reason }))
}

/// Store the request's body.
///
/// Bodies sent as `application/octet-stream` are stored verbatim. Anything else is expected to
/// be JSON like `{"text": "..."}`, and the text is stored; an empty body, or one without
/// `text`, stores [`DEFAULT_TEXT`].
pub async fn add(
    state: &GatewayState,
    request: CanonicalRequest,
) -> Result<CanonicalResponse, GatewayError> {
    let raw = is_octet_stream(&request.headers);
    let body = match request.body {
        Some(body) => match body.read_to_bytes(state.max_upload_size).await {
            Ok(body) => body,
            Err(PumpError::Write(BufferFull { limit })) => {
                debug!("Refusing body over {limit} bytes");
                return Ok(failure(StatusCode::PAYLOAD_TOO_LARGE, "too-large"));
            }
            Err(PumpError::Read(err)) => return Err(GatewayError::RequestBody(err)),
        },
        None => Bytes::new(),
    };

    let data = if raw {
        body
    } else {
        match text_to_store(&body) {
            Ok(text) => text,
            Err(ErrResponse(response)) => return Ok(response),
        }
    };

    match state.store.put(data).await {
        Ok(cid) => {
            info!("Stored {cid}");
            Ok(response::json(StatusCode::OK, json!({ "ok": true, "cid": cid })))
        }
        Err(err) => {
            error!("Couldn't store content: {err}");
            Ok(failure(StatusCode::INTERNAL_SERVER_ERROR, "store-failed"))
        }
    }
}

fn is_octet_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(OCTET_STREAM))
}

fn text_to_store(body: &[u8]) -> Result<Bytes, ErrResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Bytes::from_static(DEFAULT_TEXT.as_bytes()));
    }
    let request: AddRequest = serde_json::from_slice(body).map_err(|err| {
        debug!("Unusable body: {err}");
        ErrResponse(failure(StatusCode::BAD_REQUEST, "invalid-body"))
    })?;
    Ok(request.text.unwrap_or_else(|| DEFAULT_TEXT.to_owned()).into())
}

/// Stream back the content identified by `cid`.
///
/// By default the content is decoded as UTF-8 into a JSON envelope; `raw` sends the bytes as
/// they are. Problems found before the first chunk is available get a proper error response;
/// later ones abort the connection.
pub async fn cat(state: &GatewayState, cid: &str, raw: bool) -> CanonicalResponse {
    let cid: ContentId = match cid.parse() {
        Ok(cid) => cid,
        Err(err) => {
            debug!("Bad cid {cid:?}: {err}");
            return failure(StatusCode::BAD_REQUEST, "invalid-cid");
        }
    };

    let mut chunks = match state.store.get(&cid).await {
        Ok(chunks) => chunks,
        Err(StoreError::NotFound(_)) => {
            return failure(StatusCode::NOT_FOUND, "not-found");
        }
        Err(err) => {
            error!("Couldn't retrieve {cid}: {err}");
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "retrieve-failed");
        }
    };

    let first = match chunks.try_next().await {
        Ok(first) => first,
        Err(err) => {
            error!("Couldn't retrieve {cid}: {err}");
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "retrieve-failed");
        }
    };
    let chunks = futures::stream::iter(first.map(Ok)).chain(chunks).boxed();

    if raw {
        response::stream(StatusCode::OK, OCTET_STREAM, chunks)
    } else {
        response::stream(StatusCode::OK, "application/json", json_envelope(&cid, chunks))
    }
}
