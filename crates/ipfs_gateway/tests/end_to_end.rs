// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use ipfs_gateway::cid::ContentId;
use ipfs_gateway::identity::test_utils::sign;
use ipfs_gateway::identity::{Hs256Verifier, RejectAll};
use ipfs_gateway::storage::{FsStore, MemoryStore};
use ipfs_gateway::{respond, GatewayState, DEFAULT_TEXT};
use minhttp::Server;

const KEY: &[u8] = b"end to end secret";

struct Client {
    connections: mpsc::Sender<std::io::Result<(DuplexStream, SocketAddr)>>,
}

struct Reply {
    status: StatusCode,
    content_type: Option<String>,
    request_id: Option<String>,
    body: Bytes,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

impl Client {
    async fn send(&self, request: Request<Full<Bytes>>) -> Reply {
        let (client, server) = tokio::io::duplex(4096);
        let address = SocketAddr::from(([127, 0, 0, 1], 4000));
        self.connections.send(Ok((server, address))).await.unwrap();

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(client))
            .await
            .unwrap();
        tokio::spawn(connection);
        let response = sender.send_request(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .map(|v| v.to_str().unwrap().to_owned())
        };
        Reply {
            status: parts.status,
            content_type: header("content-type"),
            request_id: header("x-request-id"),
            body: body.collect().await.unwrap().to_bytes(),
        }
    }

    async fn get(&self, path: &str) -> Reply {
        self.send(request("GET", path, None, Bytes::new())).await
    }

    async fn add_text(&self, text: &str) -> String {
        let body = json!({ "text": text }).to_string();
        let reply = self
            .send(request("POST", "/ipfs/add", Some("application/json"), body.into()))
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        let json = reply.json();
        assert_eq!(json["ok"], true);
        json["cid"].as_str().unwrap().to_owned()
    }
}

fn request(
    method: &str,
    path: &str,
    content_type: Option<&str>,
    body: Bytes,
) -> Request<Full<Bytes>> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("host", "gateway.test");
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder.body(Full::new(body)).unwrap()
}

fn memory_state() -> GatewayState {
    let verifier = Hs256Verifier::new(KEY, Duration::from_secs(60));
    GatewayState::new(MemoryStore::new(8), verifier)
}

/// Run `tests` against a gateway serving `state`, shutting it down afterwards.
async fn with_gateway<T, F>(state: GatewayState, tests: T)
where
    T: FnOnce(Client) -> F,
    F: Future<Output = ()>,
{
    let (connections_tx, mut connections_rx) = mpsc::channel(16);
    let connections = futures::stream::poll_fn(move |cx| connections_rx.poll_recv(cx));
    let state = Arc::new(state);
    let server = Server::new(64);

    let run = server.serve(connections, move |request| respond(state.clone(), request));
    let session = async {
        tests(Client {
            connections: connections_tx,
        })
        .await;
        server.graceful_shutdown().await;
    };
    tokio::join!(run, session);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_check() {
    with_gateway(memory_state(), |client| async move {
        let reply = client.get("/").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.content_type.as_deref(), Some("application/json"));
        assert_eq!(reply.json(), json!({ "message": "IPFS gateway running" }));
        assert!(reply.request_id.is_some_and(|id| !id.is_empty()));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stored_text_can_be_read_back() {
    with_gateway(memory_state(), |client| async move {
        let text = "Content-addressed ☃, stored in eight byte blocks.";
        let cid = client.add_text(text).await;
        assert_eq!(cid, ContentId::for_bytes(text.as_bytes()).to_string());

        let reply = client.get(&format!("/ipfs/cat/{cid}")).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json(), json!({ "ok": true, "cid": &cid, "text": text }));

        let reply = client.get(&format!("/ipfs/cat/{cid}?format=raw")).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(reply.body, text.as_bytes());
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_adds_store_the_default_text() {
    with_gateway(memory_state(), |client| async move {
        let reply = client
            .send(request("POST", "/ipfs/add", None, Bytes::new()))
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        let cid = reply.json()["cid"].as_str().unwrap().to_owned();
        let reply = client.get(&format!("/ipfs/cat/{cid}")).await;
        assert_eq!(reply.json()["text"], DEFAULT_TEXT);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_adds_all_succeed() {
    with_gateway(memory_state(), |client| async move {
        let texts: Vec<String> = (0..10).map(|i| format!("document number {i}")).collect();
        let cids = futures::future::join_all(texts.iter().map(|t| client.add_text(t))).await;
        for (text, cid) in texts.iter().zip(&cids) {
            let reply = client.get(&format!("/ipfs/cat/{cid}")).await;
            assert_eq!(reply.json()["text"], text.as_str());
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retrieval_failures() {
    with_gateway(memory_state(), |client| async move {
        let reply = client.get("/ipfs/cat/not-a-cid").await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.json(), json!({ "ok": false, "reason": "invalid-cid" }));

        let missing = ContentId::for_bytes(b"nobody stored this");
        let reply = client.get(&format!("/ipfs/cat/{missing}")).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_eq!(reply.json(), json!({ "ok": false, "reason": "not-found" }));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_routes_are_404s() {
    with_gateway(memory_state(), |client| async move {
        assert_eq!(client.get("/ipfs").await.status, StatusCode::NOT_FOUND);
        assert_eq!(client.get("/ipfs/add").await.status, StatusCode::NOT_FOUND);
        let reply = client
            .send(request("DELETE", "/", None, Bytes::new()))
            .await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_uploads_are_refused() {
    let state = memory_state().with_max_upload_size(16);
    with_gateway(state, |client| async move {
        let body = Bytes::from(vec![b'x'; 1024]);
        let reply = client
            .send(request("POST", "/ipfs/add", Some("application/octet-stream"), body))
            .await;
        assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(reply.json(), json!({ "ok": false, "reason": "too-large" }));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn protected_route() {
    with_gateway(memory_state(), |client| async move {
        let reply = client.get("/protected").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json(), json!({ "ok": false, "reason": "no-token" }));

        let mut bad = request("GET", "/protected", None, Bytes::new());
        bad.headers_mut()
            .insert("authorization", "Bearer not.a.token".parse().unwrap());
        let reply = client.send(bad).await;
        assert_eq!(reply.json(), json!({ "ok": false, "reason": "verify-failed" }));

        let mut good = request("POST", "/protected", None, Bytes::new());
        let authorization = format!("Bearer {}", sign(KEY, r#"{"sub":"alice"}"#));
        good.headers_mut()
            .insert("authorization", authorization.parse().unwrap());
        let reply = client.send(good).await;
        assert_eq!(reply.json(), json!({ "ok": true, "uid": "alice" }));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn content_survives_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let text = "written to disk";

    let store = FsStore::open(dir.path()).await.unwrap().with_block_size(4);
    let verifier = Hs256Verifier::new(KEY, Duration::from_secs(60));
    let cid = ContentId::for_bytes(text.as_bytes()).to_string();
    with_gateway(GatewayState::new(store, verifier), |client| async move {
        assert_eq!(client.add_text(text).await, cid);
    })
    .await;

    let store = FsStore::open(dir.path()).await.unwrap();
    with_gateway(GatewayState::new(store, RejectAll), |client| async move {
        let cid = ContentId::for_bytes(text.as_bytes());
        let reply = client.get(&format!("/ipfs/cat/{cid}")).await;
        assert_eq!(reply.json()["text"], text);
    })
    .await;
}
