//! # Retrieval
//!
//! Executes a single invocation over the header CAR transport, returning
//! the service's receipt together with the raw response (and so any data
//! in its body).
//!
//! An invocation too large for one header is sent in parts: first the
//! invocation's own block, then each proof the service reports missing
//! with a `510 Not Extended` response. Proofs sent earlier are cached by
//! the service, so each part crosses the wire once.

use std::collections::{HashMap, HashSet};

use futures::future::{self, Either};
use http::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Channel, Connection};
use crate::delegation::{Delegation, Proof};
use crate::invocation::Invocation;
use crate::message::AgentMessage;
use crate::receipt::Receipt;
use crate::store::Block;
use crate::transport::{Outbound as _, Request, Response, headercar};
use crate::{Error, Link, Result, unexpected};

/// Retrieval options.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetrievalOptions {
    /// Accept a response without an agent message header (public data).
    pub public: bool,
}

/// The result of a retrieval.
#[derive(Clone, Debug)]
pub struct RetrievalResponse {
    /// The agent message in the response header. `None` only for public
    /// responses without a header.
    pub message: Option<AgentMessage>,

    /// The raw response, including any body.
    pub response: Response,
}

impl RetrievalResponse {
    /// The receipt for the invocation linked by `link`.
    #[must_use]
    pub fn receipt(&self, link: &Link) -> Option<Receipt> {
        self.message.as_ref().and_then(|message| message.receipt(link))
    }
}

/// Read the proofs requested in the body of a `510 Not Extended` response.
///
/// # Errors
///
/// Fails when the body is not a `MissingProofs` error or a proof link is
/// invalid.
pub fn read_missing_proofs(body: &[u8]) -> Result<Vec<Link>> {
    let value: Value = serde_json::from_slice(body)?;
    if value["name"] != "MissingProofs" {
        return Err(unexpected!("unexpected error in 510 response: {}", value["name"]));
    }
    let Some(proofs) = value["proofs"].as_array() else {
        return Err(unexpected!("510 response has no proofs"));
    };

    let mut links = Vec::with_capacity(proofs.len());
    for proof in proofs {
        let Some(link) = proof["/"].as_str() else {
            return Err(unexpected!("invalid proof link in 510 response: {proof}"));
        };
        links.push(Link::try_from(link)?);
    }
    Ok(links)
}

/// Execute `invocation` over the header CAR transport.
///
/// The whole invocation is tried first. When its header is too large, the
/// invocation is sent in parts until the service has every proof it needs.
///
/// # Errors
///
/// Fails with [`Error::InvocationTooLarge`] when a single part does not fit
/// in a header, with [`Error::Cancelled`] when `ctx` is cancelled, and when
/// the service responds with an error or an unknown proof is requested.
pub async fn execute_retrieval<C: Channel>(
    ctx: &CancellationToken, invocation: &Invocation,
    conn: &Connection<headercar::Outbound, C>, options: RetrievalOptions,
) -> Result<RetrievalResponse> {
    let message = AgentMessage::build(&[invocation.clone()], &[])?;
    match conn.codec().encode(&message) {
        Ok(request) => {
            let response = send(ctx, conn, request).await?;
            if response.status() != StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE {
                return finish(response, options);
            }
            debug!("service rejected header as too large");
        }
        Err(Error::HeaderTooLarge { size, max }) => {
            debug!("header of {size} bytes exceeds {max}, sending in parts");
        }
        Err(e) => return Err(e),
    }

    let parts = parts(invocation);
    let mut sent = HashSet::new();
    let mut next = invocation.link();

    loop {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Some(blocks) = parts.get(&next) else {
            return Err(unexpected!("service requested unknown proof {next}"));
        };
        if !sent.insert(next) {
            return Err(unexpected!("service requested proof {next} more than once"));
        }

        let message = AgentMessage::from_parts(vec![invocation.link()], &[], blocks.clone())?;
        let request = match conn.codec().encode(&message) {
            Err(Error::HeaderTooLarge { .. }) => return Err(Error::InvocationTooLarge),
            other => other?,
        };
        debug!("sending part {next}");
        let response = send(ctx, conn, request).await?;

        match response.status() {
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE => return Err(Error::InvocationTooLarge),
            StatusCode::NOT_EXTENDED => {
                let missing = read_missing_proofs(response.body())?;
                let Some(link) = missing.first() else {
                    return Err(unexpected!("510 response has no proofs"));
                };
                next = *link;
            }
            _ => return finish(response, options),
        }
    }
}

async fn send<C: Channel>(
    ctx: &CancellationToken, conn: &Connection<headercar::Outbound, C>,
    request: Request,
) -> Result<Response> {
    let cancelled = std::pin::pin!(ctx.cancelled());
    let response = std::pin::pin!(conn.channel().request(request));
    match future::select(cancelled, response).await {
        Either::Left(_) => Err(Error::Cancelled),
        Either::Right((response, _)) => response,
    }
}

fn finish(response: Response, options: RetrievalOptions) -> Result<RetrievalResponse> {
    let message = headercar::decode_response(&response, options.public)?;
    Ok(RetrievalResponse { message, response })
}

// The blocks of each part, keyed by link: the invocation's own block and
// each proof's own block, without the proofs below it.
fn parts(invocation: &Invocation) -> HashMap<Link, Vec<Block>> {
    let mut parts = HashMap::new();
    let mut pending: Vec<Delegation> = vec![invocation.delegation().clone()];

    while let Some(delegation) = pending.pop() {
        if parts.contains_key(&delegation.link()) {
            continue;
        }
        parts.insert(delegation.link(), delegation.export(delegation.proof_links()));
        pending.extend(delegation.proofs().into_iter().filter_map(|proof| match proof {
            Proof::Delegation(proof) => Some(proof),
            Proof::Link(_) => None,
        }));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Codec;

    #[test]
    fn missing_proofs() {
        let link = *Block::encode(&"proof", Codec::DagCbor).expect("should encode").link();
        let body = serde_json::json!({
            "name": "MissingProofs",
            "message": "missing proofs",
            "proofs": [{"/": link.to_string()}],
        });
        let bytes = serde_json::to_vec(&body).expect("should serialize");
        let links = read_missing_proofs(&bytes).expect("should read");
        assert_eq!(links, vec![link]);

        let other = serde_json::to_vec(&serde_json::json!({"name": "Other"}))
            .expect("should serialize");
        assert!(read_missing_proofs(&other).is_err());
    }
}
