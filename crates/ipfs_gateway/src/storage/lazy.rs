// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::future::Future;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::OnceCell;
use tracing::{error, info};

use super::{ByteStream, ContentStore, StoreError};
use crate::cid::ContentId;

type Init<S> = Box<dyn Fn() -> BoxFuture<'static, Result<S, StoreError>> + Send + Sync>;

/// Defers constructing a store until it's first used, then keeps it for good.
///
/// Concurrent first uses share a single initialization. A failed initialization is reported
/// to the caller that triggered it and retried on the next use.
pub struct LazyStore<S> {
    store: OnceCell<S>,
    init: Init<S>,
}

impl<S: ContentStore> LazyStore<S> {
    pub fn new<F, Fut>(init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, StoreError>> + Send + 'static,
    {
        Self {
            store: OnceCell::new(),
            init: Box::new(move || init().boxed()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.store.initialized()
    }

    async fn store(&self) -> Result<&S, StoreError> {
        self.store
            .get_or_try_init(|| async {
                let store = (self.init)().await;
                match &store {
                    Ok(_) => info!("Storage backend ready"),
                    Err(err) => error!("Couldn't start storage backend: {err}"),
                }
                store
            })
            .await
    }
}

#[async_trait::async_trait]
impl<S: ContentStore> ContentStore for LazyStore<S> {
    async fn put(&self, data: Bytes) -> Result<ContentId, StoreError> {
        self.store().await?.put(data).await
    }

    async fn get(&self, id: &ContentId) -> Result<ByteStream, StoreError> {
        self.store().await?.get(id).await
    }
}
