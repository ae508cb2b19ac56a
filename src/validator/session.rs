//! # Session
//!
//! A delegation issued by an absentee principal (e.g. a `did:mailto`
//! account) carries no usable signature. It becomes valid when the
//! authority attests to it with a `ucan/attest` capability whose `proof`
//! caveat links the delegation.

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, Parser};
use crate::delegation::{Delegation, DelegationBuilder};
use crate::principal::{Principal, Signer};
use crate::{Link, Result};

/// The attestation ability.
pub const ATTEST: &str = "ucan/attest";

/// Caveats of a `ucan/attest` capability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attest {
    /// The attested delegation.
    pub proof: Link,
}

/// Parser for `ucan/attest` capabilities.
#[must_use]
pub fn parser() -> Parser<Attest> {
    Parser::new(ATTEST)
}

/// Whether `capability` attests to the delegation linked by `proof` on
/// behalf of `authority`.
pub(crate) fn attests(capability: &Capability, authority: &str, proof: &Link) -> bool {
    if capability.can != ATTEST || capability.with != authority {
        return false;
    }
    capability.nb::<Attest>().is_ok_and(|attest| attest.proof == *proof)
}

/// Issue an attestation of `proof` by `authority` to `audience`.
///
/// # Errors
///
/// Fails when the attestation cannot be signed or encoded.
pub fn attest(
    authority: &(impl Signer + ?Sized), audience: &(impl Principal + ?Sized), proof: &Delegation,
) -> Result<Delegation> {
    let capability = Capability::new(ATTEST, authority.did().as_str())
        .caveats(Attest { proof: proof.link() })?;
    let builder = DelegationBuilder::new().audience(audience).capability(capability);
    let builder = match proof.expiration() {
        Some(expiration) => builder.expiration(expiration),
        None => builder.no_expiration(),
    };
    builder.build(authority)
}
