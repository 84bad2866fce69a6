// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use super::{ByteStream, ContentStore, StoreError, DEFAULT_BLOCK_SIZE};
use crate::cid::ContentId;

/// Keeps each piece of content in its own file under a root directory, named by its identifier.
pub struct FsStore {
    root: PathBuf,
    block_size: usize,
    temp_files: AtomicU64,
}

impl FsStore {
    /// Use `root` (creating it if needed) for storage.
    pub async fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            block_size: DEFAULT_BLOCK_SIZE,
            temp_files: AtomicU64::new(0),
        })
    }

    /// Stream content back in chunks of `block_size` bytes.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &ContentId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn temp_path(&self, id: &ContentId) -> PathBuf {
        let n = self.temp_files.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{id}.{}.{n}.tmp", std::process::id()))
    }
}

#[async_trait::async_trait]
impl ContentStore for FsStore {
    async fn put(&self, data: Bytes) -> Result<ContentId, StoreError> {
        let id = ContentId::for_bytes(&data);
        let path = self.path_for(&id);
        if fs::try_exists(&path).await? {
            debug!("{id} already stored");
            return Ok(id);
        }

        // Readers never see a partially written file.
        let temp_path = self.temp_path(&id);
        let written = async {
            fs::write(&temp_path, &data).await?;
            fs::rename(&temp_path, &path).await
        };
        if let Err(err) = written.await {
            if let Err(cleanup_err) = fs::remove_file(&temp_path).await {
                if cleanup_err.kind() != ErrorKind::NotFound {
                    warn!("Couldn't remove {}: {cleanup_err}", temp_path.display());
                }
            }
            return Err(err.into());
        }
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<ByteStream, StoreError> {
        let file = match File::open(self.path_for(id)).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound(*id)),
            Err(err) => return Err(err.into()),
        };
        let block_size = self.block_size;
        let blocks = futures::stream::try_unfold(file, move |file| read_block(file, block_size));
        Ok(blocks.boxed())
    }
}

async fn read_block(
    mut file: File,
    block_size: usize,
) -> Result<Option<(Bytes, File)>, StoreError> {
    let mut block = Vec::with_capacity(block_size);
    (&mut file)
        .take(block_size as u64)
        .read_to_end(&mut block)
        .await?;
    if block.is_empty() {
        return Ok(None);
    }
    Ok(Some((block.into(), file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::test_utils::{chunk_sizes, read_all};

    #[tokio::test]
    async fn stored_content_comes_back_in_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap().with_block_size(3);
        let id = store.put(Bytes::from_static(b"abcdefgh")).await.unwrap();
        assert_eq!(read_all(&store, &id).await.unwrap(), b"abcdefgh");
        assert_eq!(chunk_sizes(&store, &id).await, [3, 3, 2]);
        assert!(dir.path().join(id.to_string()).is_file());
    }

    #[tokio::test]
    async fn content_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = FsStore::open(dir.path()).await.unwrap();
            store.put(Bytes::from_static(b"persistent")).await.unwrap()
        };
        let store = FsStore::open(dir.path()).await.unwrap();
        assert_eq!(read_all(&store, &id).await.unwrap(), b"persistent");
    }

    #[tokio::test]
    async fn storing_twice_leaves_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path().join("nested/root")).await.unwrap();
        let first = store.put(Bytes::from_static(b"twice")).await.unwrap();
        let second = store.put(Bytes::from_static(b"twice")).await.unwrap();
        assert_eq!(first, second);
        let entries = std::fs::read_dir(store.root()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn empty_content_has_no_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        let id = store.put(Bytes::new()).await.unwrap();
        assert!(chunk_sizes(&store, &id).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_content_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        let id = ContentId::for_bytes(b"missing");
        let err = store.get(&id).await.err().unwrap();
        assert!(matches!(err, StoreError::NotFound(missing) if missing == id));
    }
}
