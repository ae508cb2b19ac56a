//! # Ed25519
//!
//! Ed25519 signers and verifiers. A verifier's DID is `did:key:` followed by
//! the base58btc multibase encoding of the `0xed`-tagged public key.

use std::fmt;
use std::sync::Arc;

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use zeroize::Zeroizing;

use super::{Did, Principal};
use crate::multiformat::{self, encode_varint};
use crate::signature::{EDDSA, Signature};
use crate::{Error, Result};

/// Multicodec code of an ed25519 public key.
pub const VERIFIER_CODE: u64 = 0xed;

/// Multicodec code of an ed25519 private key.
pub const SIGNER_CODE: u64 = 0x1300;

const KEY_SIZE: usize = 32;

/// An ed25519 signing key.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    verifier: Verifier,
}

impl Signer {
    /// Generate a new random signer.
    #[must_use]
    pub fn generate() -> Self {
        let secret = Zeroizing::new(rand::random::<[u8; KEY_SIZE]>());
        Self::from_secret(&secret)
    }

    /// Create a signer from a 32-byte secret key.
    #[must_use]
    pub fn from_secret(secret: &[u8; KEY_SIZE]) -> Self {
        let key = SigningKey::from_bytes(secret);
        let verifier = Verifier::from_key(key.verifying_key());
        Self { key, verifier }
    }

    /// Decode a signer from its tagged bytes: the `0x1300`-tagged secret key
    /// followed by the `0xed`-tagged public key.
    ///
    /// # Errors
    ///
    /// Fails when the tags are wrong or the public key does not belong to
    /// the secret key.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rest = multiformat::untag(SIGNER_CODE, bytes)?;
        if rest.len() < KEY_SIZE {
            return Err(Error::Principal("ed25519 signer is truncated".into()));
        }
        let (secret, public) = rest.split_at(KEY_SIZE);
        let secret: Zeroizing<[u8; KEY_SIZE]> = Zeroizing::new(
            secret.try_into().map_err(|_| Error::Principal("invalid ed25519 secret key".into()))?,
        );

        let signer = Self::from_secret(&secret);
        let verifier = Verifier::decode(public)?;
        if verifier != signer.verifier {
            return Err(Error::Principal("ed25519 public key does not match secret key".into()));
        }
        Ok(signer)
    }

    /// Parse a signer from the multibase string produced by
    /// [`Signer::format`].
    ///
    /// # Errors
    ///
    /// Fails when the string is not multibase or does not decode to an
    /// ed25519 signer.
    pub fn parse(formatted: &str) -> Result<Self> {
        let (_, bytes) = multibase::decode(formatted)?;
        let bytes = Zeroizing::new(bytes);
        Self::decode(&bytes)
    }

    /// Format the signer as a multibase base64 string of its tagged bytes.
    #[must_use]
    pub fn format(&self) -> String {
        let bytes = Zeroizing::new(super::Signer::encode(self));
        multibase::encode(multibase::Base::Base64, &*bytes)
    }

    /// The signer's ed25519 verifier.
    #[must_use]
    pub const fn ed25519_verifier(&self) -> &Verifier {
        &self.verifier
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("did", &self.verifier.did).finish_non_exhaustive()
    }
}

impl Principal for Signer {
    fn did(&self) -> Did {
        self.verifier.did.clone()
    }
}

impl super::Signer for Signer {
    fn code(&self) -> u64 {
        SIGNER_CODE
    }

    fn signature_code(&self) -> u64 {
        EDDSA
    }

    fn sign(&self, msg: &[u8]) -> Signature {
        Signature::new(EDDSA, self.key.sign(msg).to_bytes().to_vec())
    }

    fn verifier(&self) -> Arc<dyn super::Verifier> {
        Arc::new(self.verifier.clone())
    }

    fn raw(&self) -> Vec<u8> {
        self.key.to_bytes().to_vec()
    }

    fn encode(&self) -> Vec<u8> {
        let mut bytes = encode_varint(SIGNER_CODE);
        bytes.extend_from_slice(self.key.as_bytes());
        bytes.extend(super::Verifier::encode(&self.verifier));
        bytes
    }
}

/// An ed25519 public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verifier {
    key: VerifyingKey,
    did: Did,
}

impl Verifier {
    fn from_key(key: VerifyingKey) -> Self {
        let did = Did::from_key(&multiformat::tag(VERIFIER_CODE, key.as_bytes()));
        Self { key, did }
    }

    /// Decode a verifier from `0xed`-tagged public key bytes.
    ///
    /// # Errors
    ///
    /// Fails when the tag is wrong or the bytes are not a valid public key.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let raw = multiformat::untag(VERIFIER_CODE, bytes)?;
        let raw: [u8; KEY_SIZE] =
            raw.try_into().map_err(|_| Error::Principal("invalid ed25519 public key size".into()))?;
        let key = VerifyingKey::from_bytes(&raw).map_err(|e| Error::Principal(e.to_string()))?;
        Ok(Self::from_key(key))
    }

    /// Parse a verifier from an ed25519 `did:key` DID.
    ///
    /// # Errors
    ///
    /// Fails when the DID is not an ed25519 `did:key`.
    pub fn parse(did: &str) -> Result<Self> {
        let did = Did::parse(did)?;
        if !did.is_key() {
            return Err(Error::Principal(format!("expected did:key, got {did}")));
        }
        Self::decode(&did.encode()?)
    }
}

impl Principal for Verifier {
    fn did(&self) -> Did {
        self.did.clone()
    }
}

impl super::Verifier for Verifier {
    fn code(&self) -> u64 {
        VERIFIER_CODE
    }

    fn signature_code(&self) -> u64 {
        EDDSA
    }

    fn verify(&self, msg: &[u8], signature: &Signature) -> bool {
        if signature.code() != EDDSA {
            return false;
        }
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature.raw()) else {
            return false;
        };
        self.key.verify(msg, &signature).is_ok()
    }

    fn raw(&self) -> Vec<u8> {
        self.key.as_bytes().to_vec()
    }
}

/// Parse an ed25519 `did:key` into a verifier.
///
/// # Errors
///
/// Fails when the DID is not an ed25519 `did:key`.
pub fn parse(did: &str) -> Result<Arc<dyn super::Verifier>> {
    Ok(Arc::new(Verifier::parse(did)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::{Signer as _, Verifier as _};

    #[test]
    fn sign_verify() {
        let signer = Signer::generate();
        let verifier = signer.verifier();
        let signature = signer.sign(b"hello");

        assert_eq!(signature.code(), EDDSA);
        assert!(verifier.verify(b"hello", &signature));
        assert!(!verifier.verify(b"hello!", &signature));
    }

    #[test]
    fn did_prefix() {
        let signer = Signer::generate();
        assert!(signer.did().as_str().starts_with("did:key:z6Mk"));
    }

    #[test]
    fn encode_decode() {
        let signer = Signer::generate();
        let bytes = signer.encode();
        assert_eq!(bytes.len(), 68);

        let decoded = Signer::decode(&bytes).expect("should decode");
        assert_eq!(decoded.encode(), bytes);

        let verifier = Verifier::decode(&signer.verifier().encode()).expect("should decode");
        assert_eq!(verifier.encode(), signer.verifier().encode());
    }

    #[test]
    fn format_parse() {
        let signer = Signer::generate();
        let parsed = Signer::parse(&signer.format()).expect("should parse");
        assert_eq!(parsed.did(), signer.did());
    }

    #[test]
    fn parse_did() {
        let signer = Signer::generate();
        let verifier = Verifier::parse(signer.did().as_str()).expect("should parse");
        assert_eq!(verifier.did(), signer.did());
        assert!(Verifier::parse("did:web:example.com").is_err());
    }
}
