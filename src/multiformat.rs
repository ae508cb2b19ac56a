//! # Multiformat
//!
//! Multicodec tagging of raw bytes using unsigned LEB128 varint prefixes.

use crate::{Error, Result};

/// Multicodec code identifying a non-`did:key` DID (`did:web`, `did:mailto`,
/// ...) carried as UTF-8 bytes.
pub const DID_CORE: u64 = 0x0d1d;

/// Encode `value` as an unsigned varint.
#[must_use]
pub fn encode_varint(mut value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return buf;
        }
        buf.push(byte | 0x80);
    }
}

/// Decode an unsigned varint from the start of `bytes`, returning the value
/// and the number of bytes read.
///
/// # Errors
///
/// Returns an error when `bytes` ends before the varint terminates or the
/// value overflows 64 bits.
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate() {
        if i >= 10 {
            break;
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::Codec("invalid varint".into()))
}

/// Prefix `bytes` with the varint encoding of `code`.
#[must_use]
pub fn tag(code: u64, bytes: &[u8]) -> Vec<u8> {
    let mut tagged = encode_varint(code);
    tagged.extend_from_slice(bytes);
    tagged
}

/// Remove the varint `code` prefix from `bytes`.
///
/// # Errors
///
/// Fails when `bytes` is not prefixed with `code`.
pub fn untag(code: u64, bytes: &[u8]) -> Result<&[u8]> {
    let (actual, n) = decode_varint(bytes)?;
    if actual != code {
        return Err(Error::Codec(format!(
            "expected multiformat with {code:#x} tag, got {actual:#x}"
        )));
    }
    Ok(&bytes[n..])
}

/// Split tagged bytes into their code and the remaining bytes.
///
/// # Errors
///
/// Fails when `bytes` does not start with a valid varint.
pub fn split(bytes: &[u8]) -> Result<(u64, &[u8])> {
    let (code, n) = decode_varint(bytes)?;
    Ok((code, &bytes[n..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_prefix() {
        assert_eq!(encode_varint(0xed), vec![0xed, 0x01]);
        assert_eq!(encode_varint(0x1300), vec![0x80, 0x26]);
    }

    #[test]
    fn tag_untag() {
        let tagged = tag(0x1205, b"key");
        assert_eq!(untag(0x1205, &tagged).expect("should untag"), b"key");
        assert!(untag(0xed, &tagged).is_err());
    }

    #[test]
    fn truncated() {
        assert!(decode_varint(&[0x80, 0x80]).is_err());
    }
}
