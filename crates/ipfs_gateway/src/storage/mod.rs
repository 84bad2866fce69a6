// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed storage backends

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::cid::ContentId;

mod fs;
mod lazy;
mod memory;

pub use fs::FsStore;
pub use lazy::LazyStore;
pub use memory::MemoryStore;

/// Default size of the chunks content is streamed back in.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Lazily produced content; chunks are only read as they're polled.
pub type ByteStream = BoxStream<'static, Result<Bytes, StoreError>>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("no content stored under {0}")]
    NotFound(ContentId),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// A place content can be stored and retrieved by [`ContentId`].
///
/// Storing the same bytes twice yields the same identifier.
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, data: Bytes) -> Result<ContentId, StoreError>;

    /// Begin retrieving content.
    ///
    /// Unknown identifiers fail here with [`StoreError::NotFound`] rather than from the stream, so
    /// callers can report it before committing to a response.
    async fn get(&self, id: &ContentId) -> Result<ByteStream, StoreError>;
}

#[cfg(test)]
pub(crate) mod test_utils {
    use futures::TryStreamExt;

    use super::*;

    pub async fn read_all(store: &dyn ContentStore, id: &ContentId) -> Result<Vec<u8>, StoreError> {
        store
            .get(id)
            .await?
            .try_fold(vec![], |mut data, chunk| async move {
                data.extend_from_slice(&chunk);
                Ok(data)
            })
            .await
    }

    pub async fn chunk_sizes(store: &dyn ContentStore, id: &ContentId) -> Vec<usize> {
        store
            .get(id)
            .await
            .unwrap()
            .map_ok(|chunk| chunk.len())
            .try_collect()
            .await
            .unwrap()
    }
}
