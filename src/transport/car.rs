//! # CAR Transport
//!
//! Agent messages travel as the CAR-encoded request and response bodies
//! with content type `application/vnd.ipld.car`.

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE as CONTENT_TYPE_HEADER};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tracing::debug;

use super::{Payload, Request, Response, check_status};
use crate::message::AgentMessage;
use crate::store::car;
use crate::{HttpError, Result, unexpected};

/// The transport's media type.
pub const CONTENT_TYPE: &str = car::CONTENT_TYPE;

/// Encode `message` as a CAR rooted at the message.
///
/// # Errors
///
/// Fails when the CAR cannot be encoded.
pub fn encode(message: &AgentMessage) -> Result<Vec<u8>> {
    car::encode(&[message.link()], message.blocks().iter())
}

/// Decode a CAR-encoded agent message.
///
/// # Errors
///
/// Fails when the bytes are not a CAR with a single agent message root.
pub fn decode(bytes: &[u8]) -> Result<AgentMessage> {
    let (roots, blocks) = car::decode(bytes)?;
    let [root] = roots.as_slice() else {
        return Err(unexpected!("expected a single root, found {}", roots.len()));
    };
    AgentMessage::view(root, blocks)
}

/// Client codec for the CAR transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct Outbound;

impl super::Outbound for Outbound {
    fn encode(&self, message: &AgentMessage) -> Result<Request> {
        let body = encode(message)?;
        Ok(http::Request::builder()
            .method(Method::POST)
            .header(CONTENT_TYPE_HEADER, CONTENT_TYPE)
            .header(ACCEPT, CONTENT_TYPE)
            .body(Bytes::from(body))?)
    }

    fn decode(&self, response: Response) -> Result<AgentMessage> {
        check_status(&response)?;
        if !has_content_type(response.headers()) {
            return Err(HttpError::unsupported_media_type(format!(
                "response is not {CONTENT_TYPE}"
            ))
            .into());
        }
        decode(response.body())
    }
}

/// Server codec for the CAR transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct Inbound;

impl super::Inbound for Inbound {
    fn accept(&self, request: &Request) -> Result<()> {
        if !has_content_type(request.headers()) {
            debug!("rejecting request: content type is not {CONTENT_TYPE}");
            return Err(HttpError::unsupported_media_type(format!(
                "the server only accepts {CONTENT_TYPE}"
            ))
            .into());
        }
        if !accepts(request.headers()) {
            debug!("rejecting request: {CONTENT_TYPE} is not acceptable");
            return Err(HttpError::not_acceptable(format!(
                "the server can only respond with {CONTENT_TYPE}"
            ))
            .into());
        }
        Ok(())
    }

    fn decode(&self, request: &Request) -> Result<AgentMessage> {
        decode(request.body())
    }

    fn encode(&self, message: &AgentMessage, _: Option<Payload>) -> Result<Response> {
        let body = encode(message)?;
        Ok(http::Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE_HEADER, HeaderValue::from_static(CONTENT_TYPE))
            .body(Bytes::from(body))?)
    }
}

fn has_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(CONTENT_TYPE))
}

// An absent `Accept` header accepts anything.
fn accepts(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(ACCEPT) else {
        return true;
    };
    let Ok(accept) = accept.to_str() else {
        return false;
    };
    accept.split(',').filter_map(|range| range.split(';').next()).map(str::trim).any(|media| {
        media == "*/*" || media == "application/*" || media.eq_ignore_ascii_case(CONTENT_TYPE)
    })
}
