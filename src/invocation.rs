//! # Invocation
//!
//! An invocation is a delegation to a service carrying a single capability:
//! a request that the service exercise the capability on behalf of the
//! issuer.

use std::ops::Deref;
use std::sync::Arc;

use crate::capability::Capability;
use crate::delegation::{Delegation, DelegationBuilder, Proof};
use crate::principal::{Principal, Signer};
use crate::store::BlockStore;
use crate::ucan::Fact;
use crate::{Link, Result};

/// An invocation, materialized over a block store.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation(Delegation);

impl Invocation {
    /// Create a view of the invocation rooted at `root` over `blocks`.
    ///
    /// # Errors
    ///
    /// Fails when `root` is not in `blocks` or does not decode to a UCAN.
    pub fn view(root: &Link, blocks: impl Into<Arc<BlockStore>>) -> Result<Self> {
        Delegation::view(root, blocks).map(Self)
    }

    /// The invoked capability, when the invocation carries exactly one.
    #[must_use]
    pub fn capability(&self) -> Option<&Capability> {
        match self.0.capabilities() {
            [capability] => Some(capability),
            _ => None,
        }
    }

    /// The invocation as a delegation.
    #[must_use]
    pub const fn delegation(&self) -> &Delegation {
        &self.0
    }

    /// Consume the invocation, returning the underlying delegation.
    #[must_use]
    pub fn into_delegation(self) -> Delegation {
        self.0
    }
}

impl Deref for Invocation {
    type Target = Delegation;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Delegation> for Invocation {
    fn from(delegation: Delegation) -> Self {
        Self(delegation)
    }
}

/// Build and sign an [`Invocation`].
#[derive(Clone, Debug, Default)]
pub struct InvocationBuilder {
    inner: DelegationBuilder,
    capability: Option<Capability>,
}

impl InvocationBuilder {
    /// Returns a new [`InvocationBuilder`]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: DelegationBuilder::new(),
            capability: None,
        }
    }

    /// Specify the service being invoked.
    #[must_use]
    pub fn audience(mut self, audience: &(impl Principal + ?Sized)) -> Self {
        self.inner = self.inner.audience(audience);
        self
    }

    /// Specify the capability to invoke.
    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    /// Set an explicit expiration, in seconds since the Unix epoch.
    #[must_use]
    pub fn expiration(mut self, expiration: i64) -> Self {
        self.inner = self.inner.expiration(expiration);
        self
    }

    /// The invocation never expires.
    #[must_use]
    pub fn no_expiration(mut self) -> Self {
        self.inner = self.inner.no_expiration();
        self
    }

    /// Set the time, in seconds since the Unix epoch, before which the
    /// invocation is not valid.
    #[must_use]
    pub fn not_before(mut self, not_before: i64) -> Self {
        self.inner = self.inner.not_before(not_before);
        self
    }

    /// Set a nonce, making otherwise identical invocations distinct.
    #[must_use]
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.inner = self.inner.nonce(nonce);
        self
    }

    /// Add a fact.
    #[must_use]
    pub fn fact(mut self, fact: Fact) -> Self {
        self.inner = self.inner.fact(fact);
        self
    }

    /// Add a proof authorizing the invocation.
    #[must_use]
    pub fn proof(mut self, proof: impl Into<Proof>) -> Self {
        self.inner = self.inner.proof(proof);
        self
    }

    /// Add several proofs.
    #[must_use]
    pub fn proofs<P: Into<Proof>>(mut self, proofs: impl IntoIterator<Item = P>) -> Self {
        self.inner = self.inner.proofs(proofs);
        self
    }

    /// Sign the invocation with `issuer`.
    ///
    /// # Errors
    ///
    /// Fails when no audience or capability was set, or the token cannot be
    /// encoded.
    pub fn build(self, issuer: &(impl Signer + ?Sized)) -> Result<Invocation> {
        let Some(capability) = self.capability else {
            return Err(crate::unexpected!("capability is required"));
        };
        self.inner.capability(capability).build(issuer).map(Invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::ed25519;

    #[test]
    fn single_capability() {
        let alice = ed25519::Signer::generate();
        let service = ed25519::Signer::generate();

        let invocation = InvocationBuilder::new()
            .audience(&service)
            .capability(Capability::new("test/attach", alice.did().as_str()))
            .build(&alice)
            .expect("should build");

        let capability = invocation.capability().expect("should have one capability");
        assert_eq!(capability.can, "test/attach");
        assert_eq!(invocation.audience(), &service.did());
    }

    #[test]
    fn capability_required() {
        let alice = ed25519::Signer::generate();
        assert!(InvocationBuilder::new().audience(&alice).build(&alice).is_err());
    }
}
