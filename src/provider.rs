//! # Provider
//!
//! External collaborators the validator relies on: resolving proofs not
//! carried with an invocation, resolving non-`did:key` principals to their
//! keys, and checking delegations have not been revoked.
//!
//! Each trait has a default implementation that finds nothing (or revokes
//! nothing), so implementers override only what their deployment supports.

use std::future::Future;

use anyhow::anyhow;

use crate::Link;
use crate::delegation::Delegation;
use crate::principal::Did;

/// Provider trait.
pub trait Provider: ProofResolver + DidKeyResolver + RevocationChecker + Clone {}

/// Resolves delegations by link when they are not carried with a request.
pub trait ProofResolver: Send + Sync {
    /// Fetch the delegation linked by `link`.
    ///
    /// # Errors
    ///
    /// Returns an error when the delegation cannot be found.
    fn resolve_proof(
        &self, link: &Link,
    ) -> impl Future<Output = anyhow::Result<Delegation>> + Send {
        async move { Err(anyhow!("proof {link} not found")) }
    }
}

/// Resolves principals identified by a non-`did:key` DID (`did:web`,
/// `did:mailto`, ...) to the `did:key` they sign with.
pub trait DidKeyResolver: Send + Sync {
    /// Resolve `did` to a `did:key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the DID cannot be resolved.
    fn resolve_did_key(&self, did: &Did) -> impl Future<Output = anyhow::Result<Did>> + Send {
        async move { Err(anyhow!("unable to resolve {did}")) }
    }
}

/// Checks whether a delegation has been revoked.
pub trait RevocationChecker: Send + Sync {
    /// Check `delegation` has not been revoked.
    ///
    /// # Errors
    ///
    /// Returns an error describing the revocation when the delegation has
    /// been revoked.
    fn check_revocation(
        &self, delegation: &Delegation,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        let _ = delegation;
        async { Ok(()) }
    }
}
