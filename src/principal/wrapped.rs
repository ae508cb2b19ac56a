//! # Wrapped
//!
//! Wrapped principals present a DID other than their key's `did:key`, for
//! example a service identified by `did:web:example.com` that signs with an
//! ed25519 key. Cryptographic operations are delegated to the inner key.

use std::sync::Arc;

use super::{Did, Principal};
use crate::signature::Signature;

/// A signer presenting `did` while signing with an inner key.
#[derive(Clone, Debug)]
pub struct Signer {
    inner: Arc<dyn super::Signer>,
    did: Did,
}

impl Signer {
    /// Wrap `inner` so it presents `did`.
    #[must_use]
    pub fn new(inner: impl super::Signer + 'static, did: Did) -> Self {
        Self {
            inner: Arc::new(inner),
            did,
        }
    }

    /// The wrapped signer.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn super::Signer> {
        &self.inner
    }
}

impl Principal for Signer {
    fn did(&self) -> Did {
        self.did.clone()
    }
}

impl super::Signer for Signer {
    fn code(&self) -> u64 {
        self.inner.code()
    }

    fn signature_code(&self) -> u64 {
        self.inner.signature_code()
    }

    fn sign(&self, msg: &[u8]) -> Signature {
        self.inner.sign(msg)
    }

    fn verifier(&self) -> Arc<dyn super::Verifier> {
        Arc::new(Verifier {
            inner: self.inner.verifier(),
            did: self.did.clone(),
        })
    }

    fn raw(&self) -> Vec<u8> {
        self.inner.raw()
    }

    fn encode(&self) -> Vec<u8> {
        self.inner.encode()
    }
}

/// A verifier presenting `did` while verifying with an inner key.
#[derive(Clone, Debug)]
pub struct Verifier {
    inner: Arc<dyn super::Verifier>,
    did: Did,
}

impl Verifier {
    /// Wrap `inner` so it presents `did`.
    #[must_use]
    pub fn new(inner: Arc<dyn super::Verifier>, did: Did) -> Self {
        Self { inner, did }
    }

    /// The wrapped verifier.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn super::Verifier> {
        &self.inner
    }
}

impl Principal for Verifier {
    fn did(&self) -> Did {
        self.did.clone()
    }
}

impl super::Verifier for Verifier {
    fn code(&self) -> u64 {
        self.inner.code()
    }

    fn signature_code(&self) -> u64 {
        self.inner.signature_code()
    }

    fn verify(&self, msg: &[u8], signature: &Signature) -> bool {
        self.inner.verify(msg, signature)
    }

    fn raw(&self) -> Vec<u8> {
        self.inner.raw()
    }

    fn encode(&self) -> Vec<u8> {
        self.inner.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::{Signer as _, Verifier as _, ed25519};

    #[test]
    fn presents_did() {
        let key = ed25519::Signer::generate();
        let key_did = key.did();
        let did = Did::parse("did:web:example.com").expect("should parse");

        let signer = Signer::new(key, did.clone());
        assert_eq!(signer.did(), did);
        assert_eq!(signer.inner().did(), key_did);

        let verifier = signer.verifier();
        assert_eq!(verifier.did(), did);
        assert!(verifier.verify(b"msg", &signer.sign(b"msg")));
    }
}
