//! # Absentee
//!
//! An absentee is a principal without a signing key, typically an account
//! DID such as `did:mailto:web.mail:alice`. It signs with the empty
//! non-standard signature, so delegations it issues are only valid when
//! accompanied by a `ucan/attest` session from the authority.

use std::sync::Arc;

use super::{Did, Principal};
use crate::multiformat::{self, DID_CORE};
use crate::signature::{NON_STANDARD, Signature};

/// Create an absentee signer for `did`.
#[must_use]
pub fn from(did: Did) -> Signer {
    Signer { did }
}

/// A signer for a principal with no key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signer {
    did: Did,
}

impl Principal for Signer {
    fn did(&self) -> Did {
        self.did.clone()
    }
}

impl super::Signer for Signer {
    fn code(&self) -> u64 {
        DID_CORE
    }

    fn signature_code(&self) -> u64 {
        NON_STANDARD
    }

    fn sign(&self, _: &[u8]) -> Signature {
        Signature::non_standard()
    }

    fn verifier(&self) -> Arc<dyn super::Verifier> {
        Arc::new(Verifier { did: self.did.clone() })
    }

    fn raw(&self) -> Vec<u8> {
        Vec::new()
    }

    fn encode(&self) -> Vec<u8> {
        multiformat::tag(DID_CORE, self.did.as_str().as_bytes())
    }
}

/// The verifier of an absentee. It never verifies a signature: absentee
/// delegations are authorized by attestation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verifier {
    did: Did,
}

impl Principal for Verifier {
    fn did(&self) -> Did {
        self.did.clone()
    }
}

impl super::Verifier for Verifier {
    fn code(&self) -> u64 {
        DID_CORE
    }

    fn signature_code(&self) -> u64 {
        NON_STANDARD
    }

    fn verify(&self, _: &[u8], _: &Signature) -> bool {
        false
    }

    fn raw(&self) -> Vec<u8> {
        self.did.as_str().as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::{Signer as _, Verifier as _};

    #[test]
    fn signs_non_standard() {
        let did = Did::parse("did:mailto:web.mail:alice").expect("should parse");
        let signer = from(did.clone());
        let signature = signer.sign(b"anything");

        assert!(signature.is_non_standard());
        assert!(signature.raw().is_empty());
        assert_eq!(signer.did(), did);
        assert!(!signer.verifier().verify(b"anything", &signature));
    }
}
