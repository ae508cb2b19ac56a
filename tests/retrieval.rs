//! Retrieval
//!
//! Invocations sent in the `X-Agent-Message` header, with data returned in
//! the response body. Long proof chains are sent over several rounds.

use std::collections::BTreeMap;

use credibil_ucan::capability::{NoCaveats, Parser};
use credibil_ucan::client::{Connection, RetrievalOptions, execute_retrieval};
use credibil_ucan::principal::{Principal, ed25519};
use credibil_ucan::server::handler::Response;
use credibil_ucan::server::{Context, Server, provide};
use credibil_ucan::transport::{IntoHttp, Outbound as _, Payload, headercar};
use credibil_ucan::{
    AgentMessage, Capability, Delegation, DelegationBuilder, Error, InvocationBuilder,
};
use http::StatusCode;
use ipld_core::ipld::Ipld;
use test_utils::{ALICE, CountingChannel, Provider, SERVICE};
use tokio_util::sync::CancellationToken;

const BLOB: &[u8] = b"the quick brown fox";

fn service(max_header_size: usize) -> Server<Provider> {
    Server::builder(SERVICE.clone())
        .codec(headercar::Inbound)
        .max_header_size(max_header_size)
        .method(provide(Parser::<NoCaveats>::new("blob/get"), |_, ctx: Context| async move {
            let payload = Payload::new(BLOB).status(StatusCode::PARTIAL_CONTENT);
            let response = Response::ok(ctx.capability.with)?.body(payload);
            Ok::<_, anyhow::Error>(response)
        }))
        .provider(Provider::new())
        .build()
}

fn blob_get(with: &str) -> Capability {
    Capability::new("blob/get", with)
}

// A fact padded with random bytes, so delegations do not compress.
fn pad() -> BTreeMap<String, Ipld> {
    let bytes: Vec<u8> = (0..256).map(|_| rand::random::<u8>()).collect();
    BTreeMap::from([("pad".to_string(), Ipld::Bytes(bytes))])
}

// Should return the receipt in the response header and data in the body.
#[tokio::test]
async fn single_round() {
    test_utils::init_tracing();
    let channel = CountingChannel::new(service(headercar::DEFAULT_MAX_SIZE));
    let conn = Connection::new(&*SERVICE, headercar::Outbound::new(), channel.clone());

    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(blob_get(ALICE.did().as_str()))
        .build(&*ALICE)
        .expect("should build");

    let ctx = CancellationToken::new();
    let retrieval = execute_retrieval(&ctx, &invocation, &conn, RetrievalOptions::default())
        .await
        .expect("should retrieve");

    assert_eq!(channel.count(), 1);
    assert_eq!(retrieval.response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(retrieval.response.body().as_ref(), BLOB);

    let receipt = retrieval.receipt(&invocation.link()).expect("should have receipt");
    assert_eq!(receipt.out().ok(), Some(&Ipld::String(ALICE.did().to_string())));
}

// Should send a ten-link proof chain over eleven rounds: the invocation,
// then each proof as the service asks for it.
#[tokio::test]
async fn multi_round() {
    let server = service(2048);
    let channel = CountingChannel::new(server.clone());
    let outbound = headercar::Outbound::new().with_max_size(2048);
    let conn = Connection::new(&*SERVICE, outbound, channel.clone());

    // --------------------------------------------------
    // Alice delegates through a chain of ten principals.
    // --------------------------------------------------
    let resource = ALICE.did();
    let mut issuer = ed25519::Signer::clone(&ALICE);
    let mut previous: Option<Delegation> = None;
    let mut chain = Vec::new();

    for _ in 0..10 {
        let audience = ed25519::Signer::generate();
        let mut builder = DelegationBuilder::new()
            .audience(&audience)
            .capability(blob_get(resource.as_str()))
            .fact(pad());
        if let Some(proof) = &previous {
            builder = builder.proof(proof);
        }
        let delegation = builder.build(&issuer).expect("should build");
        chain.push(delegation.link());
        previous = Some(delegation);
        issuer = audience;
    }

    let last = previous.expect("should have delegation");
    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(blob_get(resource.as_str()))
        .proof(&last)
        .build(&issuer)
        .expect("should build");

    // --------------------------------------------------
    // The whole invocation does not fit in a header.
    // --------------------------------------------------
    let message = AgentMessage::build(&[invocation.clone()], &[]).expect("should build");
    let result = conn.codec().encode(&message);
    assert!(matches!(result, Err(Error::HeaderTooLarge { max: 2048, .. })));

    // --------------------------------------------------
    // Retrieve in parts.
    // --------------------------------------------------
    let ctx = CancellationToken::new();
    let retrieval = execute_retrieval(&ctx, &invocation, &conn, RetrievalOptions::default())
        .await
        .expect("should retrieve");

    assert_eq!(channel.count(), 11);
    let statuses = channel.statuses();
    assert!(statuses[..10].iter().all(|status| *status == 510));
    assert_eq!(statuses[10], 206);

    // each round asked for the next proof down the chain
    let requested: Vec<_> = chain.iter().rev().copied().collect();
    assert_eq!(channel.missing(), requested);

    // every proof and the invocation were each cached once
    assert_eq!(server.cache().len(), 11);
    for link in &chain {
        assert!(server.cache().get(link).is_some());
    }

    assert_eq!(retrieval.response.body().as_ref(), BLOB);
    let receipt = retrieval.receipt(&invocation.link()).expect("should have receipt");
    assert!(receipt.out().is_ok());
}

// Should fail when even a single part is too large for the header.
#[tokio::test]
async fn invocation_too_large() {
    let channel = CountingChannel::new(service(headercar::DEFAULT_MAX_SIZE));
    let outbound = headercar::Outbound::new().with_max_size(64);
    let conn = Connection::new(&*SERVICE, outbound, channel.clone());

    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(blob_get(ALICE.did().as_str()))
        .build(&*ALICE)
        .expect("should build");

    let ctx = CancellationToken::new();
    let result = execute_retrieval(&ctx, &invocation, &conn, RetrievalOptions::default()).await;
    assert!(matches!(result, Err(Error::InvocationTooLarge)));
    assert_eq!(channel.count(), 0);
}

// Should reject headers larger than the server's limit, and retrieval
// messages with more than one invocation.
#[tokio::test]
async fn server_limits() {
    let server = service(128);
    let ctx = CancellationToken::new();

    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(blob_get(ALICE.did().as_str()))
        .build(&*ALICE)
        .expect("should build");
    let message = AgentMessage::build(&[invocation], &[]).expect("should build");
    let request = headercar::Outbound::new().encode(&message).expect("should encode");
    let response = server.request(&ctx, request).await.into_http();
    assert_eq!(response.status(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);

    let server = service(headercar::DEFAULT_MAX_SIZE);
    let first = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(blob_get(ALICE.did().as_str()))
        .nonce("first")
        .build(&*ALICE)
        .expect("should build");
    let second = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(blob_get(ALICE.did().as_str()))
        .nonce("second")
        .build(&*ALICE)
        .expect("should build");
    let message = AgentMessage::build(&[first, second], &[]).expect("should build");
    let request = headercar::Outbound::new().encode(&message).expect("should encode");
    let response = server.request(&ctx, request).await.into_http();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: serde_json::Value =
        serde_json::from_slice(response.body()).expect("should be JSON");
    assert_eq!(body["name"], "AgentMessageInvocationCountError");
}

// Should stop when the retrieval is cancelled.
#[tokio::test]
async fn cancelled() {
    let channel = CountingChannel::new(service(headercar::DEFAULT_MAX_SIZE));
    let conn = Connection::new(&*SERVICE, headercar::Outbound::new(), channel.clone());

    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(blob_get(ALICE.did().as_str()))
        .build(&*ALICE)
        .expect("should build");

    let ctx = CancellationToken::new();
    ctx.cancel();
    let result = execute_retrieval(&ctx, &invocation, &conn, RetrievalOptions::default()).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(channel.count(), 0);
}
