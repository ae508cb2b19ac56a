//! # Validation Errors
//!
//! A failed validation yields an [`Unauthorized`] tree recording every
//! branch of the proof chain that was tried and why it failed.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Write as _};

use thiserror::Error;

use crate::Link;
use crate::capability::Capability;
use crate::outcome::Failure;
use crate::principal::Did;

/// A delegation (or the invocation itself) that cannot be used as proof.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum InvalidProof {
    /// The delegation's audience is not the expected principal.
    #[error("{link} is addressed to {actual} instead of {expected}")]
    InvalidAudience {
        /// The delegation.
        link: Link,
        /// The expected audience.
        expected: Did,
        /// The delegation's audience.
        actual: Did,
    },

    /// The delegation has expired.
    #[error("{link} has expired on {expired_at}")]
    Expired {
        /// The delegation.
        link: Link,
        /// Expiration, in seconds since the Unix epoch.
        expired_at: i64,
    },

    /// The delegation is not valid yet.
    #[error("{link} is not valid before {valid_at}")]
    NotValidBefore {
        /// The delegation.
        link: Link,
        /// Not before, in seconds since the Unix epoch.
        valid_at: i64,
    },

    /// The delegation could not be resolved.
    #[error("proof {link} is not included and could not be resolved: {reason}")]
    UnavailableProof {
        /// The missing delegation.
        link: Link,
        /// Why resolution failed.
        reason: String,
    },

    /// The signature does not verify.
    #[error("signature of {link} is invalid for issuer {issuer}")]
    InvalidSignature {
        /// The delegation.
        link: Link,
        /// The delegation's issuer.
        issuer: Did,
    },

    /// No verifier could be found for the issuer.
    #[error("unable to verify signature of {link} by {issuer}: {reason}")]
    UnverifiableSignature {
        /// The delegation.
        link: Link,
        /// The delegation's issuer.
        issuer: Did,
        /// Why no verifier was found.
        reason: String,
    },

    /// A non-`did:key` issuer could not be resolved to a key.
    #[error("unable to resolve {did} to a did:key: {reason}")]
    DidKeyResolution {
        /// The unresolved DID.
        did: Did,
        /// Why resolution failed.
        reason: String,
    },

    /// The delegation has been revoked.
    #[error("{link} has been revoked: {reason}")]
    Revoked {
        /// The delegation.
        link: Link,
        /// Revocation detail.
        reason: String,
    },

    /// A delegation issued by an absentee has no valid attestation.
    #[error("{link} issued by {issuer} has no valid ucan/attest session{}", list(.causes))]
    SessionEscalation {
        /// The delegation.
        link: Link,
        /// The delegation's issuer.
        issuer: Did,
        /// Why each candidate attestation failed.
        causes: Vec<String>,
    },
}

impl InvalidProof {
    /// The stable error name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InvalidAudience { .. } => "InvalidAudience",
            Self::Expired { .. } => "Expired",
            Self::NotValidBefore { .. } => "NotValidBefore",
            Self::UnavailableProof { .. } => "UnavailableProof",
            Self::InvalidSignature { .. } => "InvalidSignature",
            Self::UnverifiableSignature { .. } => "UnverifiableSignature",
            Self::DidKeyResolution { .. } => "DIDKeyResolutionError",
            Self::Revoked { .. } => "Revoked",
            Self::SessionEscalation { .. } => "SessionEscalation",
        }
    }
}

/// A delegated capability that cannot support a claim.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum CapabilityError {
    /// The capability's caveats do not match the expected type.
    #[error("malformed capability {capability}: {reason}")]
    Malformed {
        /// The capability.
        capability: Capability,
        /// Why the caveats were rejected.
        reason: String,
    },

    /// The claim asks for more than was delegated.
    #[error("claimed {claimed} escalates delegated {delegated}: {reason}")]
    Escalated {
        /// The claimed capability.
        claimed: Capability,
        /// The delegated capability.
        delegated: Capability,
        /// The violation.
        reason: String,
    },
}

impl CapabilityError {
    /// The stable error name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "MalformedCapability",
            Self::Escalated { .. } => "EscalatedCapability",
        }
    }
}

/// A delegation whose matching capabilities cannot support the claim.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("cannot derive claim from {link}{}", list(.causes))]
pub struct DelegationError {
    /// The delegation.
    pub link: Link,

    /// Why each matching capability failed.
    pub causes: Vec<CapabilityError>,
}

/// A proof whose own chain cannot support the claim.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("claim {capability} through {link} is not authorized")]
pub struct InvalidClaim {
    /// The delegation the claim was made through.
    pub link: Link,

    /// The capability claimed from the delegation's proofs.
    pub capability: Capability,

    /// Why the delegation's proofs do not authorize the claim.
    pub cause: Box<Unauthorized>,
}

/// A claimed capability is not authorized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Unauthorized {
    /// The claimed capability.
    pub capability: Capability,

    /// Delegations with matching but unusable capabilities.
    pub delegation_errors: Vec<DelegationError>,

    /// Delegated capabilities unrelated to the claim.
    pub unknown_capabilities: Vec<Capability>,

    /// Delegations that cannot be used as proof.
    pub invalid_proofs: Vec<InvalidProof>,

    /// Proofs whose own chain failed to authorize the claim.
    pub failed_proofs: Vec<InvalidClaim>,
}

impl Unauthorized {
    /// Create an empty error for `capability`.
    #[must_use]
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            ..Self::default()
        }
    }

    /// The stable error name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        "Unauthorized"
    }

    /// The names of every error in the tree, including this one.
    #[must_use]
    pub fn names(&self) -> BTreeSet<&'static str> {
        let mut names = BTreeSet::from([self.name()]);
        for error in &self.delegation_errors {
            names.insert("DelegationError");
            names.extend(error.causes.iter().map(CapabilityError::name));
        }
        if !self.unknown_capabilities.is_empty() {
            names.insert("UnknownCapability");
        }
        names.extend(self.invalid_proofs.iter().map(InvalidProof::name));
        for claim in &self.failed_proofs {
            names.insert("InvalidClaim");
            names.extend(claim.cause.names());
        }
        names
    }

    fn render(&self, out: &mut String, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        writeln!(out, "{pad}capability {} is not authorized because:", self.capability)?;
        for error in &self.invalid_proofs {
            writeln!(out, "{pad}  - {}: {error}", error.name())?;
        }
        for error in &self.delegation_errors {
            writeln!(out, "{pad}  - DelegationError: {error}")?;
        }
        for capability in &self.unknown_capabilities {
            writeln!(out, "{pad}  - UnknownCapability: {capability}")?;
        }
        for claim in &self.failed_proofs {
            writeln!(out, "{pad}  - InvalidClaim: {claim}")?;
            claim.cause.render(out, depth + 2)?;
        }
        if self.invalid_proofs.is_empty()
            && self.delegation_errors.is_empty()
            && self.unknown_capabilities.is_empty()
            && self.failed_proofs.is_empty()
        {
            writeln!(out, "{pad}  - no proofs were provided")?;
        }
        Ok(())
    }
}

impl Display for Unauthorized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out, 0)?;
        f.write_str(out.trim_end())
    }
}

impl std::error::Error for Unauthorized {}

impl From<&Unauthorized> for Failure {
    fn from(error: &Unauthorized) -> Self {
        Self::named(error.name(), error.to_string())
    }
}

fn list<T: Display>(items: &[T]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let items: Vec<String> = items.iter().map(ToString::to_string).collect();
    format!(": {}", items.join("; "))
}
