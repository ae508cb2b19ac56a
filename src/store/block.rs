//! # Block
//!
//! Block represents a unit of data uniquely identified by a content identifier
//! (CID), its [`Link`].

use bytes::Bytes;
use derive_more::Display;
use multihash_codetable::{Code, MultihashDigest};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Error, Link, Result, unexpected};

/// Multicodec code of the SHA2-256 hasher.
pub const SHA2_256: u64 = 0x12;

const MAX_BLOCK_SIZE: usize = 1_048_576; // 1 MiB

/// Block codecs.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq)]
pub enum Codec {
    /// DAG-CBOR (`0x71`).
    #[default]
    #[display("dag-cbor")]
    DagCbor,

    /// DAG-JSON (`0x0129`).
    #[display("dag-json")]
    DagJson,
}

impl Codec {
    /// The codec's multicodec code, used as the link prefix.
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            Self::DagCbor => 0x71,
            Self::DagJson => 0x0129,
        }
    }

    /// Look up a codec by its multicodec code.
    ///
    /// # Errors
    ///
    /// Fails for codes other than DAG-CBOR and DAG-JSON.
    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0x71 => Ok(Self::DagCbor),
            0x0129 => Ok(Self::DagJson),
            _ => Err(Error::Codec(format!("unsupported codec {code:#x}"))),
        }
    }

    /// Serialize `value` with this codec.
    ///
    /// # Errors
    ///
    /// Fails when `value` cannot be represented in the IPLD data model.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::DagCbor => serde_ipld_dagcbor::to_vec(value)
                .map_err(|e| Error::Codec(format!("issue encoding DAG-CBOR: {e}"))),
            Self::DagJson => serde_ipld_dagjson::to_vec(value)
                .map_err(|e| Error::Codec(format!("issue encoding DAG-JSON: {e}"))),
        }
    }

    /// Deserialize bytes previously encoded with this codec.
    ///
    /// # Errors
    ///
    /// Fails when the bytes are not valid for the codec or do not match `T`.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::DagCbor => serde_ipld_dagcbor::from_slice(bytes)
                .map_err(|e| Error::Codec(format!("issue decoding DAG-CBOR: {e}"))),
            Self::DagJson => serde_ipld_dagjson::from_slice(bytes)
                .map_err(|e| Error::Codec(format!("issue decoding DAG-JSON: {e}"))),
        }
    }
}

/// Compute the CIDv1 link of `bytes` encoded with the codec `code`.
#[must_use]
pub fn link(code: u64, bytes: &[u8]) -> Link {
    let hash = Code::Sha2_256.digest(bytes);
    Link::new_v1(code, hash)
}

/// Encode `value` into a block using the provided codec and SHA2-256.
///
/// # Errors
///
/// Fails when the value cannot be encoded or the block is too large.
pub fn encode<T: Serialize + ?Sized>(value: &T, codec: Codec) -> Result<Block> {
    Block::encode(value, codec)
}

/// Decode a block, verifying its integrity first.
///
/// # Errors
///
/// Fails with [`Error::DataIntegrity`] when the recomputed link differs from
/// the block's link, or when the bytes cannot be decoded as `T`.
pub fn decode<T: DeserializeOwned>(block: &Block, codec: Codec) -> Result<T> {
    if block.link.codec() != codec.code() {
        return Err(unexpected!(
            "block {} is not encoded with codec {:#x}",
            block.link,
            codec.code()
        ));
    }
    block.verify()?;
    codec.decode(&block.bytes)
}

/// Block represents a unit of data uniquely identified by a content identifier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    link: Link,
    bytes: Bytes,
}

impl Block {
    /// Creates a new block from an existing link and bytes.
    ///
    /// The pair is not verified until the block is decoded.
    #[must_use]
    pub fn new(link: Link, bytes: impl Into<Bytes>) -> Self {
        Self {
            link,
            bytes: bytes.into(),
        }
    }

    /// Encode a block using the provided codec and SHA-2 256 hash.
    ///
    /// # Errors
    ///
    /// Fails when the value cannot be encoded or the block is too large.
    pub fn encode<T: Serialize + ?Sized>(value: &T, codec: Codec) -> Result<Self> {
        let bytes = codec.encode(value)?;
        if bytes.len() > MAX_BLOCK_SIZE {
            return Err(unexpected!("block is too large"));
        }
        Ok(Self {
            link: link(codec.code(), &bytes),
            bytes: bytes.into(),
        })
    }

    /// Decode the block using the codec named by its link.
    ///
    /// # Errors
    ///
    /// Fails on an unknown codec, an integrity mismatch, or undecodable bytes.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        decode(self, Codec::from_code(self.link.codec())?)
    }

    /// Verify the block's bytes hash to its link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] on mismatch.
    pub fn verify(&self) -> Result<()> {
        if self.link.hash().code() != SHA2_256 {
            return Err(Error::Codec(format!(
                "unsupported hasher {:#x}",
                self.link.hash().code()
            )));
        }
        let actual = link(self.link.codec(), &self.bytes);
        if actual != self.link {
            return Err(Error::DataIntegrity {
                expected: self.link,
                actual,
            });
        }
        Ok(())
    }

    /// Returns the block's link.
    #[must_use]
    pub const fn link(&self) -> &Link {
        &self.link
    }

    /// Returns the block's bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
