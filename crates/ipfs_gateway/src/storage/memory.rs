// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::RwLock;

use super::{ByteStream, ContentStore, StoreError, DEFAULT_BLOCK_SIZE};
use crate::cid::ContentId;

/// Keeps content in memory, split into fixed-size blocks.
pub struct MemoryStore {
    blocks: RwLock<HashMap<ContentId, Arc<[Bytes]>>>,
    block_size: usize,
}

impl MemoryStore {
    pub fn new(block_size: usize) -> Self {
        Self {
            blocks: Default::default(),
            block_size: block_size.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

#[async_trait::async_trait]
impl ContentStore for MemoryStore {
    async fn put(&self, data: Bytes) -> Result<ContentId, StoreError> {
        let id = ContentId::for_bytes(&data);
        let blocks: Arc<[Bytes]> = (0..data.len())
            .step_by(self.block_size)
            .map(|start| data.slice(start..data.len().min(start + self.block_size)))
            .collect();
        self.blocks.write().await.entry(id).or_insert(blocks);
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<ByteStream, StoreError> {
        let blocks = self
            .blocks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))?;
        let chunks = (0..blocks.len()).map(move |i| Ok(blocks[i].clone()));
        Ok(futures::stream::iter(chunks).boxed())
    }
}
