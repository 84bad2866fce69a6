// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::identity::{Hs256Verifier, RejectAll, TokenVerifier};
use crate::storage::{ContentStore, FsStore, LazyStore, MemoryStore, StoreError};
use crate::Opts;

pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Backends shared by every request.
pub struct GatewayState {
    pub store: Arc<dyn ContentStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Largest body accepted when storing content
    pub max_upload_size: usize,
}

impl GatewayState {
    pub fn new(
        store: impl ContentStore + 'static,
        verifier: impl TokenVerifier + 'static,
    ) -> Self {
        Self {
            store: Arc::new(store),
            verifier: Arc::new(verifier),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }

    pub fn with_max_upload_size(mut self, max_upload_size: usize) -> Self {
        self.max_upload_size = max_upload_size;
        self
    }

    pub fn from_opts(opts: &Opts) -> anyhow::Result<Self> {
        let block_size = opts.block_size;
        let store: Arc<dyn ContentStore> = match &opts.store_dir {
            Some(dir) => {
                info!("Storing content under {}", dir.display());
                let dir = dir.clone();
                Arc::new(LazyStore::new(move || {
                    let dir = dir.clone();
                    async move {
                        let store = FsStore::open(dir).await?;
                        Ok::<_, StoreError>(store.with_block_size(block_size))
                    }
                }))
            }
            None => {
                info!("Storing content in memory");
                Arc::new(MemoryStore::new(block_size))
            }
        };

        let verifier: Arc<dyn TokenVerifier> = match &opts.token_secret_file {
            Some(path) => {
                let secret = fs::read_to_string(path).context("reading token secret file")?;
                let secret = secret.trim();
                if secret.is_empty() {
                    anyhow::bail!("token secret file {} is empty", path.display());
                }
                let leeway = Duration::from_secs(opts.token_leeway);
                Arc::new(Hs256Verifier::new(secret, leeway))
            }
            None => {
                warn!("No token secret configured; every token will be rejected");
                Arc::new(RejectAll)
            }
        };

        Ok(Self {
            store,
            verifier,
            max_upload_size: opts.max_upload_size,
        })
    }
}
