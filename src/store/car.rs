//! # CAR
//!
//! Content Addressable aRchive (CARv1) encoding of a set of blocks. CAR is
//! the wire format for agent messages and the archive format for delegations
//! and receipts.

use std::io::Cursor;

use serde::{Deserialize, Serialize};

use super::{Block, BlockStore, Codec};
use crate::multiformat::{decode_varint, encode_varint};
use crate::{Error, Link, Result};

/// CAR media type.
pub const CONTENT_TYPE: &str = "application/vnd.ipld.car";

/// Multicodec code identifying CAR data.
pub const CODE: u64 = 0x0202;

#[derive(Debug, Deserialize, Serialize)]
struct Header {
    roots: Vec<Link>,
    version: u64,
}

/// Encode `blocks` as a CARv1 byte stream with the given roots.
///
/// # Errors
///
/// Fails when the header cannot be encoded.
pub fn encode<'a>(roots: &[Link], blocks: impl IntoIterator<Item = &'a Block>) -> Result<Vec<u8>> {
    let header = Codec::DagCbor.encode(&Header {
        roots: roots.to_vec(),
        version: 1,
    })?;

    let mut buf = encode_varint(header.len() as u64);
    buf.extend(header);

    for block in blocks {
        let cid = block.link().to_bytes();
        buf.extend(encode_varint((cid.len() + block.bytes().len()) as u64));
        buf.extend(cid);
        buf.extend_from_slice(block.bytes());
    }

    Ok(buf)
}

/// Decode a CARv1 byte stream, returning its roots and blocks.
///
/// Each block is verified against its link.
///
/// # Errors
///
/// Fails on a malformed stream, an unsupported version, or a block whose
/// bytes do not match its link.
pub fn decode(bytes: &[u8]) -> Result<(Vec<Link>, BlockStore)> {
    let (len, start) = decode_varint(bytes)?;
    let end = section_end(bytes, start, len).ok_or_else(|| truncated("header"))?;
    let header: Header = Codec::DagCbor.decode(&bytes[start..end])?;
    if header.version != 1 {
        return Err(Error::Codec(format!("unsupported CAR version {}", header.version)));
    }

    let mut store = BlockStore::new();
    let mut offset = end;
    while offset < bytes.len() {
        let (len, n) = decode_varint(&bytes[offset..])?;
        let start = offset + n;
        let end = section_end(bytes, start, len).ok_or_else(|| truncated("section"))?;

        let mut cursor = Cursor::new(&bytes[start..end]);
        let link = Link::read_bytes(&mut cursor)?;
        let data_start = start + usize::try_from(cursor.position()).unwrap_or_default();

        let block = Block::new(link, bytes[data_start..end].to_vec());
        block.verify()?;
        store.put(block);
        offset = end;
    }

    Ok((header.roots, store))
}

// End offset of a `len` byte section at `start`, if it lies within `bytes`.
fn section_end(bytes: &[u8], start: usize, len: u64) -> Option<usize> {
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    (end <= bytes.len()).then_some(end)
}

fn truncated(part: &str) -> Error {
    Error::Codec(format!("CAR {part} is truncated"))
}
