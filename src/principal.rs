//! # Principal
//!
//! Principals are identities named by a Decentralized Identifier (DID).
//! A [`Signer`] holds private key material and can produce signatures, a
//! [`Verifier`] holds the public half and checks them.
//!
//! Three DID flavours are supported:
//!
//! - `did:key:*`: the DID *is* the multicodec-tagged public key
//! - `did:web:*`, `did:mailto:*`, ...: opaque DIDs, carried on the wire with
//!   the [`DID_CORE`] prefix
//! - absentee principals with no key at all (see [`absentee`])

pub mod absentee;
pub mod ed25519;
pub mod rsa;
pub mod wrapped;

use std::fmt::{self, Debug, Display};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::multiformat::{self, DID_CORE};
use crate::signature::{self, Signature};
use crate::{Error, Result};

const DID_KEY_PREFIX: &str = "did:key:";

/// A Decentralized Identifier.
///
/// On the wire (DAG-CBOR) a DID is carried as bytes: the tagged public key
/// for `did:key`, or the [`DID_CORE`]-tagged UTF-8 DID string otherwise.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Did(String);

impl Did {
    /// Parse a DID string.
    ///
    /// # Errors
    ///
    /// Fails when the string does not have the form `did:<method>:<id>`.
    pub fn parse(did: impl Into<String>) -> Result<Self> {
        let did = did.into();
        let mut parts = did.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(id)) if !method.is_empty() && !id.is_empty() => {
                Ok(Self(did))
            }
            _ => Err(Error::Principal(format!("invalid DID: {did}"))),
        }
    }

    /// The DID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The DID method, e.g. `key` or `mailto`.
    #[must_use]
    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Whether this is a `did:key` DID.
    #[must_use]
    pub fn is_key(&self) -> bool {
        self.0.starts_with(DID_KEY_PREFIX)
    }

    /// Encode the DID to its tagged binary form.
    ///
    /// # Errors
    ///
    /// Fails when a `did:key` does not carry a valid multibase key.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if let Some(key) = self.0.strip_prefix(DID_KEY_PREFIX) {
            let (_, bytes) = multibase::decode(key)?;
            return Ok(bytes);
        }
        Ok(multiformat::tag(DID_CORE, self.0.as_bytes()))
    }

    /// Decode a DID from its tagged binary form.
    ///
    /// # Errors
    ///
    /// Fails when the bytes are not a tagged key or a [`DID_CORE`] DID.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (code, rest) = multiformat::split(bytes)?;
        if code == DID_CORE {
            let did = std::str::from_utf8(rest).map_err(|e| Error::Principal(e.to_string()))?;
            return Self::parse(did);
        }
        let encoded = multibase::encode(multibase::Base::Base58Btc, bytes);
        Ok(Self(format!("{DID_KEY_PREFIX}{encoded}")))
    }

    /// Create a `did:key` DID from tagged public key bytes.
    #[must_use]
    pub fn from_key(tagged: &[u8]) -> Self {
        Self(format!("{DID_KEY_PREFIX}{}", multibase::encode(multibase::Base::Base58Btc, tagged)))
    }
}

impl Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Did {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Did {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Did {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error as _;

        let bytes = self.encode().map_err(S::Error::custom)?;
        serializer.serialize_bytes(&bytes)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Self::decode(&bytes).map_err(D::Error::custom)
    }
}

/// An identity named by a DID.
pub trait Principal {
    /// The principal's DID.
    fn did(&self) -> Did;
}

impl Principal for Did {
    fn did(&self) -> Did {
        self.clone()
    }
}

/// A public key able to verify signatures.
pub trait Verifier: Principal + Debug + Send + Sync {
    /// Multicodec code of the public key type.
    fn code(&self) -> u64;

    /// Code of the signature algorithm the key verifies.
    fn signature_code(&self) -> u64;

    /// Verify `signature` over `msg`.
    fn verify(&self, msg: &[u8], signature: &Signature) -> bool;

    /// Raw public key bytes.
    fn raw(&self) -> Vec<u8>;

    /// Public key bytes tagged with the key type code.
    fn encode(&self) -> Vec<u8> {
        multiformat::tag(self.code(), &self.raw())
    }
}

/// A private key able to produce signatures.
pub trait Signer: Principal + Debug + Send + Sync {
    /// Multicodec code of the private key type.
    fn code(&self) -> u64;

    /// Code of the signature algorithm the key produces.
    fn signature_code(&self) -> u64;

    /// The JWT `alg` name of the signature algorithm.
    fn signature_algorithm(&self) -> &'static str {
        signature::algorithm(self.signature_code())
    }

    /// Sign `msg`.
    fn sign(&self, msg: &[u8]) -> Signature;

    /// The verifier for signatures produced by this signer.
    fn verifier(&self) -> Arc<dyn Verifier>;

    /// Raw private key bytes.
    fn raw(&self) -> Vec<u8>;

    /// Key bytes tagged with the key type code.
    fn encode(&self) -> Vec<u8>;
}

impl<T: Principal + ?Sized> Principal for Arc<T> {
    fn did(&self) -> Did {
        (**self).did()
    }
}

impl<T: Verifier + ?Sized> Verifier for Arc<T> {
    fn code(&self) -> u64 {
        (**self).code()
    }

    fn signature_code(&self) -> u64 {
        (**self).signature_code()
    }

    fn verify(&self, msg: &[u8], signature: &Signature) -> bool {
        (**self).verify(msg, signature)
    }

    fn raw(&self) -> Vec<u8> {
        (**self).raw()
    }

    fn encode(&self) -> Vec<u8> {
        (**self).encode()
    }
}

impl<T: Signer + ?Sized> Signer for Arc<T> {
    fn code(&self) -> u64 {
        (**self).code()
    }

    fn signature_code(&self) -> u64 {
        (**self).signature_code()
    }

    fn sign(&self, msg: &[u8]) -> Signature {
        (**self).sign(msg)
    }

    fn verifier(&self) -> Arc<dyn Verifier> {
        (**self).verifier()
    }

    fn raw(&self) -> Vec<u8> {
        (**self).raw()
    }

    fn encode(&self) -> Vec<u8> {
        (**self).encode()
    }
}

/// A function parsing a DID string into a verifier.
pub type ParseFn = fn(&str) -> Result<Arc<dyn Verifier>>;

/// Composed DID parser: registered parsers are tried in order and the first
/// success wins.
#[derive(Clone)]
pub struct Parser {
    parsers: Vec<ParseFn>,
}

impl Default for Parser {
    fn default() -> Self {
        Self {
            parsers: vec![ed25519::parse, rsa::parse],
        }
    }
}

impl Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser").field("parsers", &self.parsers.len()).finish()
    }
}

impl Parser {
    /// Create a parser from an ordered list of parse functions.
    #[must_use]
    pub const fn new(parsers: Vec<ParseFn>) -> Self {
        Self { parsers }
    }

    /// Register an additional parser, tried after the existing ones.
    #[must_use]
    pub fn or(mut self, parser: ParseFn) -> Self {
        self.parsers.push(parser);
        self
    }

    /// Parse `did` into a verifier.
    ///
    /// # Errors
    ///
    /// Fails when no registered parser accepts the DID.
    pub fn parse(&self, did: &str) -> Result<Arc<dyn Verifier>> {
        let mut reasons = Vec::new();
        for parse in &self.parsers {
            match parse(did) {
                Ok(verifier) => return Ok(verifier),
                Err(e) => reasons.push(e.to_string()),
            }
        }
        Err(Error::Principal(format!("unsupported DID {did}: {}", reasons.join("; "))))
    }
}

/// Parse `did` with the default composed parser.
///
/// # Errors
///
/// Fails when the DID is not a supported `did:key`.
pub fn parse(did: &str) -> Result<Arc<dyn Verifier>> {
    Parser::default().parse(did)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_core_round_trip() {
        let did = Did::parse("did:mailto:web.mail:alice").expect("should parse");
        let bytes = did.encode().expect("should encode");
        assert_eq!(&bytes[..2], &multiformat::encode_varint(DID_CORE)[..]);
        assert_eq!(Did::decode(&bytes).expect("should decode"), did);
        assert_eq!(did.method(), "mailto");
    }

    #[test]
    fn did_key_round_trip() {
        let signer = ed25519::Signer::generate();
        let did = signer.did();
        assert!(did.is_key());
        let bytes = did.encode().expect("should encode");
        assert_eq!(bytes, signer.verifier().encode());
        assert_eq!(Did::decode(&bytes).expect("should decode"), did);
    }

    #[test]
    fn invalid_did() {
        assert!(Did::parse("alice").is_err());
        assert!(Did::parse("did:web").is_err());
    }

    #[test]
    fn composed_parser() {
        let signer = ed25519::Signer::generate();
        let verifier = parse(signer.did().as_str()).expect("should parse");
        assert_eq!(verifier.did(), signer.did());
        assert!(parse("did:web:example.com").is_err());
    }
}
