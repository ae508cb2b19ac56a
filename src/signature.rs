//! # Signature
//!
//! Signatures are carried as varsig-style bytes: the varint signature
//! algorithm code, the varint length of the raw signature, then the raw
//! signature bytes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::multiformat::{decode_varint, encode_varint};
use crate::{Error, Result};

/// `EdDSA` (ed25519) signature code.
pub const EDDSA: u64 = 0xd0ed;

/// `RS256` (RSASSA-PKCS1-v1_5 with SHA-256) signature code.
pub const RS256: u64 = 0xd0_1205;

/// Code of the non-standard signature produced by absentee signers.
pub const NON_STANDARD: u64 = 0xd000;

/// A signature and the code of the algorithm that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    code: u64,
    raw: Vec<u8>,
}

impl Signature {
    /// Create a signature from an algorithm code and raw signature bytes.
    #[must_use]
    pub const fn new(code: u64, raw: Vec<u8>) -> Self {
        Self { code, raw }
    }

    /// The empty, non-standard signature used by absentee signers.
    #[must_use]
    pub const fn non_standard() -> Self {
        Self::new(NON_STANDARD, Vec::new())
    }

    /// Signature algorithm code.
    #[must_use]
    pub const fn code(&self) -> u64 {
        self.code
    }

    /// Raw signature bytes.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Whether this is the non-standard signature of an absentee.
    #[must_use]
    pub const fn is_non_standard(&self) -> bool {
        self.code == NON_STANDARD
    }

    /// The JWT `alg` name for the signature's algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        algorithm(self.code)
    }

    /// Encode as `varint(code) || varint(len) || raw`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = encode_varint(self.code);
        buf.extend(encode_varint(self.raw.len() as u64));
        buf.extend_from_slice(&self.raw);
        buf
    }

    /// Decode bytes produced by [`Signature::encode`].
    ///
    /// # Errors
    ///
    /// Fails when the bytes are truncated or carry trailing data.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (code, n) = decode_varint(bytes)?;
        let (len, m) = decode_varint(&bytes[n..])?;
        let raw = &bytes[n + m..];
        if raw.len() as u64 != len {
            return Err(Error::Codec(format!(
                "signature length mismatch: expected {len} bytes, got {}",
                raw.len()
            )));
        }
        Ok(Self::new(code, raw.to_vec()))
    }
}

/// The JWT `alg` name for a signature code.
#[must_use]
pub const fn algorithm(code: u64) -> &'static str {
    match code {
        EDDSA => "EdDSA",
        RS256 => "RS256",
        _ => "",
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("algorithm", &self.algorithm())
            .field("code", &format_args!("{:#x}", self.code))
            .field("len", &self.raw.len())
            .finish()
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Self::decode(&bytes).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let sig = Signature::new(EDDSA, vec![7; 64]);
        let bytes = sig.encode();
        assert_eq!(&bytes[..3], &[0xed, 0xa1, 0x03]);
        assert_eq!(Signature::decode(&bytes).expect("should decode"), sig);
    }

    #[test]
    fn non_standard_is_empty() {
        let sig = Signature::non_standard();
        assert!(sig.is_non_standard());
        assert!(sig.raw().is_empty());
        assert_eq!(Signature::decode(&sig.encode()).expect("should decode"), sig);
    }
}
