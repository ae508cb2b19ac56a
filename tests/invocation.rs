//! Invocation
//!
//! Invocations sent to an in-process service over the CAR transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use credibil_ucan::capability::{Match, NoCaveats, Parser};
use credibil_ucan::client::{self, Connection};
use credibil_ucan::outcome::{Failure, Unit};
use credibil_ucan::principal::Principal;
use credibil_ucan::server::handler::Response;
use credibil_ucan::server::{Context, Server, provide};
use credibil_ucan::transport::{Inbound as _, IntoHttp, Outbound as _, Payload, car};
use credibil_ucan::{Capability, DelegationBuilder, Error, InvocationBuilder};
use http::StatusCode;
use ipld_core::ipld::Ipld;
use serde::Deserialize;
use test_utils::{ALICE, BOB, Provider, SERVICE};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct Echo {
    text: String,
}

fn service() -> Server<Provider> {
    Server::builder(SERVICE.clone())
        .method(provide(Parser::<Echo>::new("debug/echo"), |echo: Match<Echo>, _| async move {
            Response::ok(echo.nb.text).map_err(Into::into)
        }))
        .method(provide(Parser::<Echo>::new("debug/fail"), |_, _: Context| async move {
            Err::<Response, _>(anyhow::anyhow!("boom"))
        }))
        .provider(Provider::new())
        .build()
}

fn echo(text: &str) -> Capability {
    Capability::new("debug/echo", ALICE.did().as_str())
        .caveats(serde_json::json!({"text": text}))
        .expect("should set caveats")
}

// Should execute an invocation and return its receipt, signed by the service.
#[tokio::test]
async fn round_trip() {
    test_utils::init_tracing();
    let server = service();
    let conn = Connection::new(&*SERVICE, car::Outbound, server);

    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(echo("hello"))
        .build(&*ALICE)
        .expect("should build");

    let reply = client::execute(&[invocation.clone()], &conn).await.expect("should execute");
    let receipt = reply.receipt(&invocation.link()).expect("should have receipt");

    assert_eq!(receipt.ran(), invocation.link());
    assert_eq!(receipt.issuer(), Some(&SERVICE.did()));
    assert_eq!(receipt.out().ok(), Some(&Ipld::String("hello".into())));

    let verifier = credibil_ucan::principal::Signer::verifier(&*SERVICE);
    assert!(receipt.verify_signature(&verifier).expect("should verify"));
}

// Should execute an invocation authorized by a delegation.
#[tokio::test]
async fn delegated_round_trip() {
    let server = Server::builder(SERVICE.clone())
        .method(provide(Parser::<NoCaveats>::new("test/attach"), |_, _: Context| async move {
            Response::ok(Unit {}).map_err(Into::into)
        }))
        .provider(Provider::new())
        .build();
    let conn = Connection::new(&*SERVICE, car::Outbound, server);

    let capability = Capability::new("test/attach", ALICE.did().as_str());
    let delegation = DelegationBuilder::new()
        .audience(&*BOB)
        .capability(capability.clone())
        .build(&*ALICE)
        .expect("should build");
    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(capability)
        .proof(&delegation)
        .build(&*BOB)
        .expect("should build");

    let reply = client::execute(&[invocation.clone()], &conn).await.expect("should execute");
    let receipt = reply.receipt(&invocation.link()).expect("should have receipt");
    assert_eq!(receipt.ran(), invocation.link());

    let outcome = receipt.out_as::<Unit, Failure>().expect("should decode outcome");
    assert_eq!(outcome.ok(), Some(&Unit {}));
}

// Should run several invocations in one message and report a receipt for each.
#[tokio::test]
async fn batch() {
    let conn = Connection::new(&*SERVICE, car::Outbound, service());

    let first = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(echo("one"))
        .build(&*ALICE)
        .expect("should build");
    let second = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(echo("two"))
        .nonce("second")
        .build(&*ALICE)
        .expect("should build");

    let reply = client::execute(&[first.clone(), second.clone()], &conn)
        .await
        .expect("should execute");
    assert_eq!(reply.receipts().len(), 2);

    let receipt = reply.receipt(&first.link()).expect("should have receipt");
    assert_eq!(receipt.out().ok(), Some(&Ipld::String("one".into())));
    let receipt = reply.receipt(&second.link()).expect("should have receipt");
    assert_eq!(receipt.out().ok(), Some(&Ipld::String("two".into())));
}

// Should report unknown abilities and failing handlers as receipt errors.
#[tokio::test]
async fn handler_errors() {
    let caught = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&caught);
    let server = Server::builder(SERVICE.clone())
        .method(provide(Parser::<Echo>::new("debug/fail"), |_, _: Context| async move {
            Err::<Response, _>(anyhow::anyhow!("boom"))
        }))
        .catch(move |error| sink.lock().expect("should lock").push(error.name()))
        .provider(Provider::new())
        .build();
    let conn = Connection::new(&*SERVICE, car::Outbound, server);

    // --------------------------------------------------
    // No handler for the ability.
    // --------------------------------------------------
    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(echo("hello"))
        .build(&*ALICE)
        .expect("should build");
    let reply = client::execute(&[invocation.clone()], &conn).await.expect("should execute");
    let receipt = reply.receipt(&invocation.link()).expect("should have receipt");

    let outcome = receipt.out_as::<Ipld, Failure>().expect("should decode outcome");
    let failure = outcome.error().expect("should fail");
    assert_eq!(failure.name.as_deref(), Some("HandlerNotFoundError"));

    // --------------------------------------------------
    // The handler fails.
    // --------------------------------------------------
    let capability = Capability::new("debug/fail", ALICE.did().as_str())
        .caveats(serde_json::json!({"text": "x"}))
        .expect("should set caveats");
    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(capability)
        .build(&*ALICE)
        .expect("should build");
    let reply = client::execute(&[invocation.clone()], &conn).await.expect("should execute");
    let receipt = reply.receipt(&invocation.link()).expect("should have receipt");

    let outcome = receipt.out_as::<Ipld, Failure>().expect("should decode outcome");
    let failure = outcome.error().expect("should fail");
    assert_eq!(failure.name.as_deref(), Some("HandlerExecutionError"));
    assert!(failure.message.contains("boom"));
    assert_eq!(*caught.lock().expect("should lock"), vec!["HandlerExecutionError"]);
}

// Should reject invocations addressed to another principal.
#[tokio::test]
async fn wrong_audience() {
    let conn = Connection::new(&*SERVICE, car::Outbound, service());
    let invocation = InvocationBuilder::new()
        .audience(&*BOB)
        .capability(echo("hello"))
        .build(&*ALICE)
        .expect("should build");

    let reply = client::execute(&[invocation.clone()], &conn).await.expect("should execute");
    let receipt = reply.receipt(&invocation.link()).expect("should have receipt");
    let outcome = receipt.out_as::<Ipld, Failure>().expect("should decode outcome");
    let failure = outcome.error().expect("should fail");
    assert_eq!(failure.name.as_deref(), Some("Unauthorized"));
    assert!(failure.message.contains(BOB.did().as_str()));
}

// Should negotiate content type: 415 for unsupported bodies, 406 for
// unacceptable responses.
#[tokio::test]
async fn content_negotiation() {
    let server = service();
    let ctx = CancellationToken::new();

    let request = http::Request::builder()
        .method("POST")
        .header("content-type", "application/json")
        .body(Bytes::from_static(b"{}"))
        .expect("should build");
    let response = server.request(&ctx, request).await.into_http();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let request = http::Request::builder()
        .method("POST")
        .header("content-type", car::CONTENT_TYPE)
        .header("accept", "text/plain")
        .body(Bytes::new())
        .expect("should build");
    let response = server.request(&ctx, request).await.into_http();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);

    let Err(Error::Http(error)) = car::Inbound.accept(
        &http::Request::builder().method("POST").body(Bytes::new()).expect("should build"),
    ) else {
        panic!("should reject missing content type");
    };
    assert_eq!(error.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

// Should stop work when the request is cancelled.
#[tokio::test]
async fn cancelled() {
    let server = service();
    let ctx = CancellationToken::new();
    ctx.cancel();

    let invocation = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(echo("hello"))
        .build(&*ALICE)
        .expect("should build");
    let message = credibil_ucan::AgentMessage::build(&[invocation], &[]).expect("should build");
    let request = car::Outbound.encode(&message).expect("should encode");

    let result = server.request(&ctx, request).await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

// Should report a panicking handler as a failed receipt without losing the
// other receipts in the message.
#[tokio::test]
async fn handler_panics() {
    let caught = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&caught);
    let server = Server::builder(SERVICE.clone())
        .method(provide(Parser::<Echo>::new("debug/echo"), |echo: Match<Echo>, _| async move {
            Response::ok(echo.nb.text).map_err(Into::into)
        }))
        .method(provide(Parser::<NoCaveats>::new("debug/panic"), |_, _: Context| async move {
            if true {
                panic!("handler bug");
            }
            Response::ok(Unit {}).map_err(Into::into)
        }))
        .catch(move |error| sink.lock().expect("should lock").push(error.to_string()))
        .provider(Provider::new())
        .build();
    let conn = Connection::new(&*SERVICE, car::Outbound, server);

    let ok = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(echo("still here"))
        .build(&*ALICE)
        .expect("should build");
    let panics = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(Capability::new("debug/panic", ALICE.did().as_str()))
        .build(&*ALICE)
        .expect("should build");

    let reply =
        client::execute(&[ok.clone(), panics.clone()], &conn).await.expect("should execute");
    assert_eq!(reply.receipts().len(), 2);

    let receipt = reply.receipt(&ok.link()).expect("should have receipt");
    assert_eq!(receipt.out().ok(), Some(&Ipld::String("still here".into())));

    let receipt = reply.receipt(&panics.link()).expect("should have receipt");
    let outcome = receipt.out_as::<Ipld, Failure>().expect("should decode outcome");
    let failure = outcome.error().expect("should fail");
    assert_eq!(failure.name.as_deref(), Some("HandlerExecutionError"));
    assert!(failure.message.contains("handler bug"));

    let caught = caught.lock().expect("should lock");
    assert_eq!(caught.len(), 1);
    assert!(caught[0].contains("handler bug"));
}

// Should drop bodies produced by handlers that finished before the request
// was cancelled.
#[tokio::test]
async fn cancelled_bodies() {
    let ctx = CancellationToken::new();
    let stop = ctx.clone();
    let server = Server::builder(SERVICE.clone())
        .method(provide(Parser::<NoCaveats>::new("blob/get"), |_, _: Context| async move {
            let response = Response::ok(Unit {})?.body(Payload::new(&b"data"[..]));
            Ok::<_, anyhow::Error>(response)
        }))
        .method(provide(Parser::<NoCaveats>::new("debug/stop"), move |_, _: Context| {
            let stop = stop.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                stop.cancel();
                std::future::pending::<anyhow::Result<Response>>().await
            }
        }))
        .provider(Provider::new())
        .build();

    let get = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(Capability::new("blob/get", ALICE.did().as_str()))
        .build(&*ALICE)
        .expect("should build");
    let stop = InvocationBuilder::new()
        .audience(&*SERVICE)
        .capability(Capability::new("debug/stop", ALICE.did().as_str()))
        .build(&*ALICE)
        .expect("should build");

    let message = credibil_ucan::AgentMessage::build(&[get.clone(), stop], &[])
        .expect("should build");
    let request = car::Outbound.encode(&message).expect("should encode");

    let result = server.request(&ctx, request).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(server.take_body(&get.link()).is_none());
}
