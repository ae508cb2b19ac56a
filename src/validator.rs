//! # Validator
//!
//! Decides whether an invocation's issuer is authorized to exercise the
//! capability it claims. The validator walks the invocation's proof chain
//! towards a principal allowed to issue the capability directly (by
//! default, the principal named as the capability's resource).
//!
//! Every proof on the way is resolved, checked for time bounds, signature
//! and revocation, aligned with the issuer it delegates to, and its
//! capabilities matched against the claim. Every branch tried is recorded,
//! so a failed validation yields an [`Unauthorized`] tree explaining why.

mod error;
pub mod session;

use std::fmt;
use std::sync::Arc;

use async_recursion::async_recursion;
use tracing::{debug, warn};

pub use self::error::*;
use crate::capability::{Capability, CapabilityParser, ReadError, can_match};
use crate::delegation::{Delegation, Proof};
use crate::invocation::Invocation;
use crate::principal::{self, Did, Principal, Verifier, wrapped};
use crate::provider::Provider;

/// Decides whether `issuer` may issue `capability` without proof.
pub type CanIssue = Arc<dyn Fn(&Capability, &Did) -> bool + Send + Sync>;

/// The default self-issue rule: a principal may issue capabilities on
/// itself.
#[must_use]
pub fn can_issue(capability: &Capability, issuer: &Did) -> bool {
    capability.with == issuer.as_str()
}

/// Everything validation depends on.
#[derive(Clone)]
pub struct ValidationContext<P: Provider> {
    /// The service's own verifier. Invocations must be addressed to it.
    pub authority: Arc<dyn Verifier>,

    /// Additional DIDs invocations may be addressed to.
    pub alternative_audiences: Vec<Did>,

    /// Parser for the claimed capability.
    pub parser: Arc<dyn CapabilityParser>,

    /// Self-issue rule.
    pub can_issue: CanIssue,

    /// Parses `did:key` issuers into verifiers.
    pub principal_parser: principal::Parser,

    /// Proof resolution, DID key resolution, and revocation.
    pub provider: P,
}

impl<P: Provider> ValidationContext<P> {
    /// Create a context with the default self-issue rule and principal
    /// parser.
    pub fn new(
        authority: Arc<dyn Verifier>, parser: Arc<dyn CapabilityParser>, provider: P,
    ) -> Self {
        Self {
            authority,
            alternative_audiences: Vec::new(),
            parser,
            can_issue: Arc::new(can_issue),
            principal_parser: principal::Parser::default(),
            provider,
        }
    }

    /// Accept invocations addressed to any of `audiences`.
    #[must_use]
    pub fn alternative_audiences(mut self, audiences: impl IntoIterator<Item = Did>) -> Self {
        self.alternative_audiences = audiences.into_iter().collect();
        self
    }

    /// Replace the self-issue rule.
    #[must_use]
    pub fn can_issue(mut self, can_issue: CanIssue) -> Self {
        self.can_issue = can_issue;
        self
    }

    /// Replace the principal parser.
    #[must_use]
    pub fn principal_parser(mut self, parser: principal::Parser) -> Self {
        self.principal_parser = parser;
        self
    }
}

impl<P: Provider> fmt::Debug for ValidationContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationContext")
            .field("authority", &self.authority.did())
            .field("alternative_audiences", &self.alternative_audiences)
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

/// A successful validation: the claimed capability, the delegation it was
/// claimed through, and the authorization of the proof it derives from.
#[derive(Clone, Debug, PartialEq)]
pub struct Authorization {
    /// The authorized capability.
    pub capability: Capability,

    /// The delegation the capability was claimed through.
    pub delegation: Delegation,

    /// Authorization of the supporting proof. Empty when the delegation's
    /// issuer could issue the capability directly.
    pub proofs: Vec<Authorization>,
}

impl Authorization {
    /// The principal that claimed the capability.
    #[must_use]
    pub fn issuer(&self) -> &Did {
        self.delegation.issuer()
    }

    /// The principal the chain originates from.
    #[must_use]
    pub fn origin(&self) -> &Did {
        self.proofs.first().map_or_else(|| self.issuer(), Self::origin)
    }
}

/// Validate `invocation` against `ctx`.
///
/// # Errors
///
/// Returns an [`Unauthorized`] tree when the invocation is not authorized.
pub async fn access<P: Provider>(
    invocation: &Invocation, ctx: &ValidationContext<P>,
) -> Result<Authorization, Unauthorized> {
    let Some(capability) = invocation.capability() else {
        let mut unauthorized =
            Unauthorized::new(invocation.capabilities().first().cloned().unwrap_or_default());
        unauthorized.delegation_errors.push(DelegationError {
            link: invocation.link(),
            causes: vec![CapabilityError::Malformed {
                capability: unauthorized.capability.clone(),
                reason: "invocation must have exactly one capability".into(),
            }],
        });
        return Err(unauthorized);
    };
    let mut unauthorized = Unauthorized::new(capability.clone());

    let audience = invocation.audience();
    let authority = ctx.authority.did();
    if *audience != authority && !ctx.alternative_audiences.contains(audience) {
        warn!("invocation {} addressed to {audience}", invocation.link());
        unauthorized.invalid_proofs.push(InvalidProof::InvalidAudience {
            link: invocation.link(),
            expected: authority,
            actual: audience.clone(),
        });
        return Err(unauthorized);
    }

    match ctx.parser.check(capability) {
        Ok(()) => {}
        Err(ReadError::Unknown) => {
            unauthorized.unknown_capabilities.push(capability.clone());
            return Err(unauthorized);
        }
        Err(ReadError::Malformed(reason)) => {
            unauthorized.delegation_errors.push(DelegationError {
                link: invocation.link(),
                causes: vec![CapabilityError::Malformed {
                    capability: capability.clone(),
                    reason,
                }],
            });
            return Err(unauthorized);
        }
    }

    let walk = Walk::new(ctx, ctx.parser.as_ref(), &ctx.can_issue);
    if let Err(invalid) = walk.check(invocation, &invocation.proofs()).await {
        warn!("invocation {} is invalid: {invalid}", invocation.link());
        unauthorized.invalid_proofs.push(invalid);
        return Err(unauthorized);
    }

    let result = walk.authorize(capability, invocation).await;
    if let Err(e) = &result {
        debug!("invocation {} is unauthorized: {:?}", invocation.link(), e.names());
    }
    result
}

/// Validate that `capability` is delegated by one of `proofs`, without an
/// invoking principal. Each proof is checked as it would be in an
/// invocation's chain, without audience alignment.
///
/// # Errors
///
/// Returns an [`Unauthorized`] tree when none of the proofs authorize the
/// capability.
pub async fn claim<P: Provider>(
    capability: &Capability, proofs: &[Proof], ctx: &ValidationContext<P>,
) -> Result<Authorization, Unauthorized> {
    let walk = Walk::new(ctx, ctx.parser.as_ref(), &ctx.can_issue);
    let mut unauthorized = Unauthorized::new(capability.clone());

    for proof in proofs {
        let delegation = match walk.resolve(proof).await {
            Ok(delegation) => delegation,
            Err(invalid) => {
                unauthorized.invalid_proofs.push(invalid);
                continue;
            }
        };
        if let Err(invalid) = walk.check(&delegation, proofs).await {
            unauthorized.invalid_proofs.push(invalid);
            continue;
        }
        if let Some(authorization) = walk.derive(capability, &delegation, &mut unauthorized).await {
            return Ok(authorization);
        }
    }

    Err(unauthorized)
}

// A walk of a proof chain with a fixed parser and self-issue rule.
struct Walk<'a, P: Provider> {
    ctx: &'a ValidationContext<P>,
    parser: &'a dyn CapabilityParser,
    can_issue: &'a CanIssue,
    now: i64,
}

impl<'a, P: Provider> Walk<'a, P> {
    fn new(
        ctx: &'a ValidationContext<P>, parser: &'a dyn CapabilityParser, can_issue: &'a CanIssue,
    ) -> Self {
        Self {
            ctx,
            parser,
            can_issue,
            now: chrono::Utc::now().timestamp(),
        }
    }

    // Authorize `claim` as claimed by the (already checked) `source`.
    #[async_recursion]
    async fn authorize(
        &self, claim: &Capability, source: &Delegation,
    ) -> Result<Authorization, Unauthorized> {
        if (self.can_issue)(claim, source.issuer()) {
            return Ok(Authorization {
                capability: claim.clone(),
                delegation: source.clone(),
                proofs: Vec::new(),
            });
        }

        let mut unauthorized = Unauthorized::new(claim.clone());
        let proofs = source.proofs();

        for proof in &proofs {
            let delegation = match self.resolve(proof).await {
                Ok(delegation) => delegation,
                Err(invalid) => {
                    unauthorized.invalid_proofs.push(invalid);
                    continue;
                }
            };
            if delegation.audience() != source.issuer() {
                unauthorized.invalid_proofs.push(InvalidProof::InvalidAudience {
                    link: delegation.link(),
                    expected: source.issuer().clone(),
                    actual: delegation.audience().clone(),
                });
                continue;
            }
            if let Err(invalid) = self.check(&delegation, &proofs).await {
                unauthorized.invalid_proofs.push(invalid);
                continue;
            }
            if let Some(authorization) = self.derive(claim, &delegation, &mut unauthorized).await {
                return Ok(Authorization {
                    capability: claim.clone(),
                    delegation: source.clone(),
                    proofs: vec![authorization],
                });
            }
        }

        Err(unauthorized)
    }

    // Find a capability in `delegation` that `claim` derives from and
    // authorize it through the delegation's own proofs.
    async fn derive(
        &self, claim: &Capability, delegation: &Delegation, unauthorized: &mut Unauthorized,
    ) -> Option<Authorization> {
        let mut causes = Vec::new();

        for capability in delegation.capabilities() {
            if !can_match(&capability.can, &claim.can) {
                unauthorized.unknown_capabilities.push(capability.clone());
                continue;
            }

            // the delegated capability, read as the claimed ability
            let delegated = Capability {
                can: claim.can.clone(),
                with: capability.with.clone(),
                nb: capability.nb.clone(),
            };
            match self.parser.check(&delegated) {
                Ok(()) => {}
                Err(ReadError::Unknown) => {
                    unauthorized.unknown_capabilities.push(capability.clone());
                    continue;
                }
                Err(ReadError::Malformed(reason)) => {
                    causes.push(CapabilityError::Malformed {
                        capability: capability.clone(),
                        reason,
                    });
                    continue;
                }
            }
            if let Err(reason) = self.parser.derives(claim, &delegated) {
                causes.push(CapabilityError::Escalated {
                    claimed: claim.clone(),
                    delegated,
                    reason,
                });
                continue;
            }

            match self.authorize(&delegated, delegation).await {
                Ok(authorization) => return Some(authorization),
                Err(cause) => unauthorized.failed_proofs.push(InvalidClaim {
                    link: delegation.link(),
                    capability: delegated,
                    cause: Box::new(cause),
                }),
            }
        }

        if !causes.is_empty() {
            unauthorized.delegation_errors.push(DelegationError {
                link: delegation.link(),
                causes,
            });
        }
        None
    }

    async fn resolve(&self, proof: &Proof) -> Result<Delegation, InvalidProof> {
        match proof {
            Proof::Delegation(delegation) => Ok(delegation.clone()),
            Proof::Link(link) => self.ctx.provider.resolve_proof(link).await.map_err(|e| {
                InvalidProof::UnavailableProof {
                    link: *link,
                    reason: e.to_string(),
                }
            }),
        }
    }

    // Check time bounds, signature, and revocation. `siblings` are searched
    // for attestations when the delegation is issued by an absentee.
    async fn check(&self, delegation: &Delegation, siblings: &[Proof]) -> Result<(), InvalidProof> {
        if let Some(expired_at) =
            delegation.expiration().filter(|_| delegation.is_expired_at(self.now))
        {
            return Err(InvalidProof::Expired {
                link: delegation.link(),
                expired_at,
            });
        }
        if let Some(valid_at) =
            delegation.not_before().filter(|_| delegation.is_too_early_at(self.now))
        {
            return Err(InvalidProof::NotValidBefore {
                link: delegation.link(),
                valid_at,
            });
        }

        self.verify_signature(delegation, siblings).await?;

        self.ctx.provider.check_revocation(delegation).await.map_err(|e| InvalidProof::Revoked {
            link: delegation.link(),
            reason: e.to_string(),
        })
    }

    async fn verify_signature(
        &self, delegation: &Delegation, siblings: &[Proof],
    ) -> Result<(), InvalidProof> {
        if delegation.signature().is_non_standard() {
            return self.verify_session(delegation, siblings).await;
        }

        let issuer = delegation.issuer();
        let verifier = self.verifier(delegation).await?;
        let input = delegation.data().signing_input().map_err(|e| {
            InvalidProof::UnverifiableSignature {
                link: delegation.link(),
                issuer: issuer.clone(),
                reason: e.to_string(),
            }
        })?;

        if !verifier.verify(&input, delegation.signature()) {
            return Err(InvalidProof::InvalidSignature {
                link: delegation.link(),
                issuer: issuer.clone(),
            });
        }
        Ok(())
    }

    // The verifier for a delegation's issuer. `did:key` issuers are parsed,
    // the authority is known, and other DIDs are resolved to their key.
    async fn verifier(&self, delegation: &Delegation) -> Result<Arc<dyn Verifier>, InvalidProof> {
        let issuer = delegation.issuer();
        let unverifiable = |reason: String| InvalidProof::UnverifiableSignature {
            link: delegation.link(),
            issuer: issuer.clone(),
            reason,
        };

        if issuer.is_key() {
            return self
                .ctx
                .principal_parser
                .parse(issuer.as_str())
                .map_err(|e| unverifiable(e.to_string()));
        }
        if *issuer == self.ctx.authority.did() {
            return Ok(Arc::clone(&self.ctx.authority));
        }

        let key = self.ctx.provider.resolve_did_key(issuer).await.map_err(|e| {
            InvalidProof::DidKeyResolution {
                did: issuer.clone(),
                reason: e.to_string(),
            }
        })?;
        let inner = self
            .ctx
            .principal_parser
            .parse(key.as_str())
            .map_err(|e| unverifiable(e.to_string()))?;
        Ok(Arc::new(wrapped::Verifier::new(inner, issuer.clone())))
    }

    // Find an attestation of `delegation` by the authority among `siblings`.
    #[async_recursion]
    async fn verify_session(
        &self, delegation: &Delegation, siblings: &[Proof],
    ) -> Result<(), InvalidProof> {
        let authority = self.ctx.authority.did();
        let parser = session::parser();
        let issuer = authority.clone();
        let can_issue: CanIssue = Arc::new(move |_, candidate| *candidate == issuer);
        let mut causes = Vec::new();

        for proof in siblings {
            if proof.link() == delegation.link() {
                continue;
            }
            let Ok(attestation) = self.resolve(proof).await else {
                continue;
            };
            for capability in attestation.capabilities() {
                if !session::attests(capability, authority.as_str(), &delegation.link()) {
                    continue;
                }
                if let Err(invalid) = self.check(&attestation, siblings).await {
                    causes.push(invalid.to_string());
                    continue;
                }
                let walk = Walk {
                    ctx: self.ctx,
                    parser: &parser,
                    can_issue: &can_issue,
                    now: self.now,
                };
                match walk.authorize(capability, &attestation).await {
                    Ok(_) => return Ok(()),
                    Err(unauthorized) => causes.push(unauthorized.to_string()),
                }
            }
        }

        warn!("no session for {} issued by {}", delegation.link(), delegation.issuer());
        Err(InvalidProof::SessionEscalation {
            link: delegation.link(),
            issuer: delegation.issuer().clone(),
            causes,
        })
    }
}
