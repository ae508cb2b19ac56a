//! # RSA
//!
//! RSASSA-PKCS1-v1_5 with SHA-256 (`RS256`) signers and verifiers. Public
//! keys are tagged PKCS#1 DER, private keys tagged PKCS#8 DER.

use std::fmt;
use std::sync::Arc;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::pkcs1v15::{SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer as _, Verifier as _};
use rsa::{RsaPrivateKey, RsaPublicKey};

use super::{Did, Principal};
use crate::multiformat;
use crate::signature::{RS256, Signature};
use crate::{Error, Result};

/// Multicodec code of an RSA public key (PKCS#1 DER).
pub const VERIFIER_CODE: u64 = 0x1205;

/// Multicodec code of an RSA private key (PKCS#8 DER).
pub const SIGNER_CODE: u64 = 0x1305;

/// Default modulus size used by [`Signer::generate`].
pub const DEFAULT_KEY_SIZE: usize = 2048;

/// An RSA signing key.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey<Sha256>,
    der: Vec<u8>,
    verifier: Verifier,
}

impl Signer {
    /// Generate a new random signer with a [`DEFAULT_KEY_SIZE`] bit modulus.
    ///
    /// # Errors
    ///
    /// Fails when key generation fails.
    pub fn generate() -> Result<Self> {
        let key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, DEFAULT_KEY_SIZE)
            .map_err(|e| Error::Principal(e.to_string()))?;
        Self::from_key(key)
    }

    /// Create a signer from PKCS#8 DER private key bytes.
    ///
    /// # Errors
    ///
    /// Fails when the bytes are not a PKCS#8 RSA private key.
    pub fn from_pkcs8(der: &[u8]) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_der(der).map_err(|e| Error::Principal(e.to_string()))?;
        Self::from_key(key)
    }

    /// Create a signer from PKCS#1 DER private key bytes.
    ///
    /// # Errors
    ///
    /// Fails when the bytes are not a PKCS#1 RSA private key.
    pub fn from_pkcs1(der: &[u8]) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs1_der(der).map_err(|e| Error::Principal(e.to_string()))?;
        Self::from_key(key)
    }

    fn from_key(key: RsaPrivateKey) -> Result<Self> {
        let der = key.to_pkcs8_der().map_err(|e| Error::Principal(e.to_string()))?;
        let verifier = Verifier::from_key(key.to_public_key())?;
        Ok(Self {
            key: SigningKey::new(key),
            der: der.as_bytes().to_vec(),
            verifier,
        })
    }

    /// Decode a signer from `0x1305`-tagged PKCS#8 bytes.
    ///
    /// # Errors
    ///
    /// Fails when the tag is wrong or the key cannot be read.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::from_pkcs8(multiformat::untag(SIGNER_CODE, bytes)?)
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
        RS256
    }

    fn sign(&self, msg: &[u8]) -> Signature {
        Signature::new(RS256, self.key.sign(msg).to_vec())
    }

    fn verifier(&self) -> Arc<dyn super::Verifier> {
        Arc::new(self.verifier.clone())
    }

    fn raw(&self) -> Vec<u8> {
        self.der.clone()
    }

    fn encode(&self) -> Vec<u8> {
        multiformat::tag(SIGNER_CODE, &self.der)
    }
}

/// An RSA public key.
#[derive(Clone, Debug)]
pub struct Verifier {
    key: VerifyingKey<Sha256>,
    der: Vec<u8>,
    did: Did,
}

impl PartialEq for Verifier {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Verifier {}

impl Verifier {
    fn from_key(key: RsaPublicKey) -> Result<Self> {
        let der = key.to_pkcs1_der().map_err(|e| Error::Principal(e.to_string()))?;
        let der = der.as_bytes().to_vec();
        Ok(Self {
            key: VerifyingKey::new(key),
            did: Did::from_key(&multiformat::tag(VERIFIER_CODE, &der)),
            der,
        })
    }

    /// Decode a verifier from `0x1205`-tagged PKCS#1 bytes.
    ///
    /// # Errors
    ///
    /// Fails when the tag is wrong or the key cannot be read.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let der = multiformat::untag(VERIFIER_CODE, bytes)?;
        let key = RsaPublicKey::from_pkcs1_der(der).map_err(|e| Error::Principal(e.to_string()))?;
        Self::from_key(key)
    }

    /// Parse a verifier from an RSA `did:key` DID.
    ///
    /// # Errors
    ///
    /// Fails when the DID is not an RSA `did:key`.
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
        RS256
    }

    fn verify(&self, msg: &[u8], signature: &Signature) -> bool {
        if signature.code() != RS256 {
            return false;
        }
        let Ok(signature) = rsa::pkcs1v15::Signature::try_from(signature.raw()) else {
            return false;
        };
        self.key.verify(msg, &signature).is_ok()
    }

    fn raw(&self) -> Vec<u8> {
        self.der.clone()
    }
}

/// Parse an RSA `did:key` into a verifier.
///
/// # Errors
///
/// Fails when the DID is not an RSA `did:key`.
pub fn parse(did: &str) -> Result<Arc<dyn super::Verifier>> {
    Ok(Arc::new(Verifier::parse(did)?))
}
