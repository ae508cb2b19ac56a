//! Validation
//!
//! Proof chains checked against a service: attenuation, time bounds,
//! revocation, signatures, DID resolution, and account sessions.

use std::sync::Arc;

use chrono::Utc;
use credibil_ucan::capability::{CapabilityParser, Parser};
use credibil_ucan::principal::{Did, Principal, Signer, absentee, wrapped};
use credibil_ucan::validator::{self, ValidationContext, session};
use credibil_ucan::{Capability, Delegation, DelegationBuilder, Invocation, InvocationBuilder};
use serde::Deserialize;
use test_utils::{ALICE, BOB, CAROL, MALLORY, Provider, SERVICE};

#[derive(Debug, Deserialize)]
struct Echo {
    #[allow(dead_code)]
    text: Option<String>,
}

fn context(provider: &Provider) -> ValidationContext<Provider> {
    let parser: Arc<dyn CapabilityParser> = Arc::new(Parser::<Echo>::new("debug/echo"));
    ValidationContext::new(SERVICE.verifier(), parser, provider.clone())
}

fn echo(with: &str, text: Option<&str>) -> Capability {
    let capability = Capability::new("debug/echo", with);
    match text {
        Some(text) => {
            capability.caveats(serde_json::json!({"text": text})).expect("should set caveats")
        }
        None => capability,
    }
}

fn invoke(
    issuer: &(impl Signer + ?Sized), capability: Capability, proofs: &[&Delegation],
) -> Invocation {
    InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(capability)
        .proofs(proofs.iter().copied())
        .build(issuer)
        .expect("should build")
}

// Should allow a delegate to invoke within, and only within, the caveats
// delegated.
#[tokio::test]
async fn attenuation() {
    test_utils::init_tracing();
    let provider = Provider::new();
    let alice = ALICE.did();

    let delegation = DelegationBuilder::new()
        .audience(&*BOB)
        .capability(echo(alice.as_str(), Some("hi")))
        .build(&*ALICE)
        .expect("should build");

    // --------------------------------------------------
    // Bob invokes with the delegated caveats.
    // --------------------------------------------------
    let invocation = invoke(&*BOB, echo(alice.as_str(), Some("hi")), &[&delegation]);
    let authorization =
        validator::access(&invocation, &context(&provider)).await.expect("should authorize");
    assert_eq!(authorization.issuer(), &BOB.did());
    assert_eq!(authorization.origin(), &alice);
    assert_eq!(authorization.proofs.len(), 1);

    // --------------------------------------------------
    // Bob changes the caveat.
    // --------------------------------------------------
    let invocation = invoke(&*BOB, echo(alice.as_str(), Some("bye")), &[&delegation]);
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("EscalatedCapability"));

    // --------------------------------------------------
    // Bob claims a resource Alice does not own.
    // --------------------------------------------------
    let invocation = invoke(&*BOB, echo(CAROL.did().as_str(), Some("hi")), &[&delegation]);
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("EscalatedCapability"));
}

// Should reject a re-delegation to a resource the delegator was never given.
#[tokio::test]
async fn escalated_redelegation() {
    let provider = Provider::new();
    let alice = ALICE.did();
    let other = CAROL.did();

    let to_bob = DelegationBuilder::new()
        .audience(&*BOB)
        .capability(Capability::new("debug/echo", alice.as_str()))
        .build(&*ALICE)
        .expect("should build");
    let to_mallory = DelegationBuilder::new()
        .audience(&*MALLORY)
        .capability(Capability::new("debug/echo", other.as_str()))
        .proof(&to_bob)
        .build(&*BOB)
        .expect("should build");

    let invocation = invoke(&*MALLORY, echo(other.as_str(), None), &[&to_mallory]);
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    let names = unauthorized.names();
    assert!(names.contains("EscalatedCapability") || names.contains("InvalidClaim"));
    assert!(unauthorized.to_string().contains(alice.as_str()));
}

// Should authorize through a chain of re-delegations, and reject a chain
// whose audience and issuer do not line up.
#[tokio::test]
async fn delegation_chain() {
    let provider = Provider::new();
    let alice = ALICE.did();

    let to_bob = DelegationBuilder::new()
        .audience(&*BOB)
        .capability(Capability::new("debug/*", alice.as_str()))
        .build(&*ALICE)
        .expect("should build");
    let to_carol = DelegationBuilder::new()
        .audience(&*CAROL)
        .capability(echo(alice.as_str(), None))
        .proof(&to_bob)
        .build(&*BOB)
        .expect("should build");

    let invocation = invoke(&*CAROL, echo(alice.as_str(), None), &[&to_carol]);
    let authorization =
        validator::access(&invocation, &context(&provider)).await.expect("should authorize");
    assert_eq!(authorization.origin(), &alice);

    // Mallory presents Bob's delegation to Carol as her own.
    let invocation = invoke(&*MALLORY, echo(alice.as_str(), None), &[&to_carol]);
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("InvalidAudience"));
}

// Should reject expired and not-yet-valid delegations and invocations.
#[tokio::test]
async fn time_bounds() {
    let provider = Provider::new();
    let alice = ALICE.did();
    let now = Utc::now().timestamp();

    let expired = DelegationBuilder::new()
        .audience(&*BOB)
        .capability(echo(alice.as_str(), None))
        .expiration(now - 10)
        .build(&*ALICE)
        .expect("should build");
    let invocation = invoke(&*BOB, echo(alice.as_str(), None), &[&expired]);
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("Expired"));

    let early = DelegationBuilder::new()
        .audience(&*BOB)
        .capability(echo(alice.as_str(), None))
        .not_before(now + 3600)
        .build(&*ALICE)
        .expect("should build");
    let invocation = invoke(&*BOB, echo(alice.as_str(), None), &[&early]);
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("NotValidBefore"));

    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(echo(alice.as_str(), None))
        .expiration(now - 1)
        .build(&*ALICE)
        .expect("should build");
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("Expired"));
}

// Should reject a chain once one of its delegations is revoked.
#[tokio::test]
async fn revocation() {
    let provider = Provider::new();
    let alice = ALICE.did();

    let delegation = DelegationBuilder::new()
        .audience(&*BOB)
        .capability(echo(alice.as_str(), None))
        .build(&*ALICE)
        .expect("should build");
    let invocation = invoke(&*BOB, echo(alice.as_str(), None), &[&delegation]);
    validator::access(&invocation, &context(&provider)).await.expect("should authorize");

    provider.revoke(delegation.link());
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("Revoked"));
}

// Should resolve proofs sent by link only.
#[tokio::test]
async fn linked_proof() {
    let provider = Provider::new();
    let alice = ALICE.did();

    let delegation = DelegationBuilder::new()
        .audience(&*BOB)
        .capability(echo(alice.as_str(), None))
        .build(&*ALICE)
        .expect("should build");
    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(echo(alice.as_str(), None))
        .proof(delegation.link())
        .build(&*BOB)
        .expect("should build");

    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("UnavailableProof"));

    provider.add_proof(&delegation);
    validator::access(&invocation, &context(&provider)).await.expect("should authorize");
}

// Should reject a delegation signed by a key other than the issuer's.
#[tokio::test]
async fn forged_signature() {
    let provider = Provider::new();
    let alice = ALICE.did();

    let forger = wrapped::Signer::new(MALLORY.clone(), alice.clone());
    let forged = DelegationBuilder::new()
        .audience(&*BOB)
        .capability(echo(alice.as_str(), None))
        .build(&forger)
        .expect("should build");
    let invocation = invoke(&*BOB, echo(alice.as_str(), None), &[&forged]);

    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("InvalidSignature"));
}

// Should verify issuers with non-`did:key` DIDs by resolving their key.
#[tokio::test]
async fn resolved_issuer() {
    let provider = Provider::new();
    let web = Did::parse("did:web:bob.example.com").expect("should parse");
    let issuer = wrapped::Signer::new(BOB.clone(), web.clone());

    let delegation = DelegationBuilder::new()
        .audience(&*ALICE)
        .capability(echo(web.as_str(), None))
        .build(&issuer)
        .expect("should build");
    let invocation = invoke(&*ALICE, echo(web.as_str(), None), &[&delegation]);

    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("DIDKeyResolutionError"));

    provider.add_key(&web, &BOB.did());
    let authorization =
        validator::access(&invocation, &context(&provider)).await.expect("should authorize");
    assert_eq!(authorization.origin(), &web);
}

// Should accept delegations from a keyless account only with a session
// attested by the service.
#[tokio::test]
async fn account_session() {
    let provider = Provider::new();
    let account = absentee::from(Did::parse("did:mailto:web.mail:alice").expect("should parse"));
    let resource = account.did();

    let delegation = DelegationBuilder::new()
        .audience(&*ALICE)
        .capability(echo(resource.as_str(), None))
        .build(&account)
        .expect("should build");

    // --------------------------------------------------
    // Without an attestation the account's signature cannot be checked.
    // --------------------------------------------------
    let invocation = invoke(&*ALICE, echo(resource.as_str(), None), &[&delegation]);
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("SessionEscalation"));

    // --------------------------------------------------
    // The service attests the delegation.
    // --------------------------------------------------
    let attestation = session::attest(&*SERVICE, &*ALICE, &delegation).expect("should attest");
    let capability = &attestation.capabilities()[0];
    assert_eq!(capability.can, session::ATTEST);
    assert_eq!(capability.with, SERVICE.did().as_str());

    let invocation =
        invoke(&*ALICE, echo(resource.as_str(), None), &[&delegation, &attestation]);
    let authorization =
        validator::access(&invocation, &context(&provider)).await.expect("should authorize");
    assert_eq!(authorization.origin(), &resource);

    // --------------------------------------------------
    // An attestation from anyone but the service is ignored.
    // --------------------------------------------------
    let fake = session::attest(&*MALLORY, &*ALICE, &delegation).expect("should attest");
    let invocation = invoke(&*ALICE, echo(resource.as_str(), None), &[&delegation, &fake]);
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("SessionEscalation"));

    // --------------------------------------------------
    // Revoking the attestation ends the session.
    // --------------------------------------------------
    provider.revoke(attestation.link());
    let invocation =
        invoke(&*ALICE, echo(resource.as_str(), None), &[&delegation, &attestation]);
    let unauthorized =
        validator::access(&invocation, &context(&provider)).await.expect_err("should fail");
    assert!(unauthorized.names().contains("SessionEscalation"));
}
