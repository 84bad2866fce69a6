// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content identifiers

use std::fmt;
use std::str::FromStr;

use base58::{FromBase58, ToBase58};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Multihash code for sha2-256
const SHA2_256: u8 = 0x12;
const DIGEST_LEN: usize = 32;
/// Length of the string form: base58 of the 34-byte multihash
const ENCODED_LEN: usize = 46;
const PREFIX: &str = "Qm";

/// Reasons a string isn't a valid [`ContentId`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CidError {
    #[error("expected {ENCODED_LEN} characters, found {0}")]
    Length(usize),
    #[error("expected an identifier starting with {PREFIX:?}")]
    Prefix,
    #[error("invalid base58")]
    Encoding,
    #[error("not a sha2-256 multihash")]
    Multihash,
}

/// Identifier of stored content, derived from the content alone.
///
/// The string form is the base58btc encoding of the content's sha2-256 multihash, which always
/// looks like `Qm` followed by 44 more characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId([u8; DIGEST_LEN]);

impl ContentId {
    /// Compute the identifier of `data`.
    pub fn for_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    fn multihash(&self) -> [u8; DIGEST_LEN + 2] {
        let mut multihash = [0; DIGEST_LEN + 2];
        multihash[0] = SHA2_256;
        multihash[1] = DIGEST_LEN as u8;
        multihash[2..].copy_from_slice(&self.0);
        multihash
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.multihash().to_base58())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({self})")
    }
}

impl FromStr for ContentId {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ENCODED_LEN {
            return Err(CidError::Length(s.len()));
        }
        if !s.starts_with(PREFIX) {
            return Err(CidError::Prefix);
        }
        let multihash = s.from_base58().map_err(|_| CidError::Encoding)?;
        match multihash.as_slice() {
            [SHA2_256, len, digest @ ..]
                if *len as usize == DIGEST_LEN && digest.len() == DIGEST_LEN =>
            {
                let mut id = [0; DIGEST_LEN];
                id.copy_from_slice(digest);
                Ok(Self(id))
            }
            _ => Err(CidError::Multihash),
        }
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
