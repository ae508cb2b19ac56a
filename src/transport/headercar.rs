//! # Header CAR Transport
//!
//! Agent messages travel in the `X-Agent-Message` header as the multibase
//! base64 encoding of the gzipped CAR. The body is left for handler data,
//! which suits content retrieval: a response carries the receipt in its
//! header and the retrieved bytes in its body.
//!
//! Headers are size-limited, so invocations with long proof chains may
//! need to be sent over several rounds (see [`crate::client`]).

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tracing::debug;

use super::{Payload, Request, Response, car, check_status};
use crate::message::AgentMessage;
use crate::{Error, HttpError, Result};

/// The agent message header.
pub const HEADER: &str = "x-agent-message";

/// Default maximum size of an encoded agent message header.
pub const DEFAULT_MAX_SIZE: usize = 4096;

/// Maximum size of the CAR inflated from a header.
pub const MAX_DECODED_SIZE: u64 = 4 * 1024 * 1024;

/// Encode `message` as an `X-Agent-Message` header value.
///
/// # Errors
///
/// Fails when the message cannot be encoded or compressed.
pub fn encode_header(message: &AgentMessage) -> Result<String> {
    let bytes = car::encode(message)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes)?;
    let compressed = encoder.finish()?;
    Ok(multibase::encode(multibase::Base::Base64, compressed))
}

/// Decode an `X-Agent-Message` header value.
///
/// # Errors
///
/// Fails when the value is not a multibase, gzipped, CAR-encoded agent
/// message, or inflates to more than [`MAX_DECODED_SIZE`] bytes.
pub fn decode_header(value: &str) -> Result<AgentMessage> {
    let (_, compressed) = multibase::decode(value)?;
    let mut bytes = Vec::new();
    GzDecoder::new(compressed.as_slice()).take(MAX_DECODED_SIZE + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > MAX_DECODED_SIZE {
        return Err(Error::Codec(format!(
            "agent message header inflates to more than {MAX_DECODED_SIZE} bytes"
        )));
    }
    car::decode(&bytes)
}

/// The agent message header of `headers`, when present and not empty.
#[must_use]
pub fn header(headers: &HeaderMap) -> Option<&str> {
    headers.get(HEADER).and_then(|value| value.to_str().ok()).filter(|value| !value.is_empty())
}

/// Decode the agent message in a retrieval response. A response without
/// the header is data only: accepted (as `None`) when `public` is set.
///
/// # Errors
///
/// Fails with [`Error::Http`] on a non-success status, with
/// [`Error::MissingHeader`] when the header is absent and `public` is not
/// set, and when the header does not decode.
pub fn decode_response(response: &Response, public: bool) -> Result<Option<AgentMessage>> {
    check_status(response)?;
    match header(response.headers()) {
        Some(value) => decode_header(value).map(Some),
        None if public => Ok(None),
        None => Err(Error::MissingHeader(HEADER.into())),
    }
}

fn header_value(value: String) -> Result<HeaderValue> {
    HeaderValue::try_from(value).map_err(|e| Error::from(http::Error::from(e)))
}

/// Client codec for the header CAR transport.
#[derive(Clone, Debug)]
pub struct Outbound {
    max_size: usize,
    method: Method,
    headers: HeaderMap,
}

impl Default for Outbound {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbound {
    /// Create a codec with the default maximum header size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            method: Method::GET,
            headers: HeaderMap::new(),
        }
    }

    /// Set the maximum size of an encoded header.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the request method (`GET` by default).
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header to every request (e.g. `Range`).
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The maximum size of an encoded header.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl super::Outbound for Outbound {
    fn encode(&self, message: &AgentMessage) -> Result<Request> {
        let value = encode_header(message)?;
        if value.len() > self.max_size {
            return Err(Error::HeaderTooLarge {
                size: value.len(),
                max: self.max_size,
            });
        }

        let mut request = http::Request::new(Bytes::new());
        *request.method_mut() = self.method.clone();
        *request.headers_mut() = self.headers.clone();
        request.headers_mut().insert(HEADER, header_value(value)?);
        Ok(request)
    }

    fn decode(&self, response: Response) -> Result<AgentMessage> {
        decode_response(&response, false)?.ok_or_else(|| Error::MissingHeader(HEADER.into()))
    }
}

/// Server codec for the header CAR transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct Inbound;

impl super::Inbound for Inbound {
    fn accept(&self, request: &Request) -> Result<()> {
        if header(request.headers()).is_none() {
            debug!("rejecting request: missing {HEADER} header");
            return Err(HttpError::unsupported_media_type(format!(
                "missing {HEADER} header in request"
            ))
            .into());
        }
        Ok(())
    }

    fn decode(&self, request: &Request) -> Result<AgentMessage> {
        let Some(value) = header(request.headers()) else {
            return Err(Error::MissingHeader(HEADER.into()));
        };
        decode_header(value)
    }

    fn encode(&self, message: &AgentMessage, body: Option<Payload>) -> Result<Response> {
        let Payload {
            status,
            headers,
            body,
        } = body.unwrap_or_else(|| Payload::new(Bytes::new()));

        let value = encode_header(message)?;
        let mut response = http::Response::new(body);
        *response.status_mut() = if status.is_success() { status } else { StatusCode::OK };
        *response.headers_mut() = headers;
        response.headers_mut().insert(HEADER, header_value(value)?);
        Ok(response)
    }

    fn is_retrieval(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Inbound as _, Outbound as _};

    #[test]
    fn header_round_trip() {
        let message = AgentMessage::build(&[], &[]).expect("should build");
        let request = Outbound::new().encode(&message).expect("should encode");
        assert_eq!(request.method(), Method::GET);
        assert!(request.body().is_empty());

        Inbound.accept(&request).expect("should accept");
        let decoded = Inbound.decode(&request).expect("should decode");
        assert_eq!(decoded.link(), message.link());

        let payload = Payload::new(&b"hello"[..]).status(StatusCode::PARTIAL_CONTENT);
        let response = Inbound.encode(&decoded, Some(payload)).expect("should encode");
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.body().as_ref(), b"hello");

        let decoded = Outbound::new().decode(response).expect("should decode");
        assert_eq!(decoded.link(), message.link());
    }

    #[test]
    fn empty_header() {
        let request = http::Request::builder()
            .header(HEADER, "")
            .body(Bytes::new())
            .expect("should build");
        let Err(Error::Http(http)) = Inbound.accept(&request) else {
            panic!("should be HTTP error");
        };
        assert_eq!(http.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn header_too_large() {
        let message = AgentMessage::build(&[], &[]).expect("should build");
        let result = Outbound::new().with_max_size(8).encode(&message);
        assert!(matches!(result, Err(Error::HeaderTooLarge { max: 8, .. })));
    }

    #[test]
    fn inflated_too_large() {
        let zeros = vec![0u8; usize::try_from(MAX_DECODED_SIZE).expect("should fit") + 1];
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&zeros).expect("should compress");
        let compressed = encoder.finish().expect("should finish");
        let value = multibase::encode(multibase::Base::Base64, compressed);

        let result = decode_header(&value);
        assert!(matches!(result, Err(Error::Codec(_))));

        let mut response = http::Response::new(Bytes::new());
        response.headers_mut().insert(HEADER, header_value(value).expect("should be valid"));
        let result = decode_response(&response, false);
        assert!(matches!(result, Err(Error::Codec(_))));
    }

    #[test]
    fn public_response() {
        let response = http::Response::new(Bytes::from_static(b"data"));
        let message = decode_response(&response, true).expect("should decode");
        assert!(message.is_none());

        let result = decode_response(&response, false);
        assert!(matches!(result, Err(Error::MissingHeader(_))));
    }
}
