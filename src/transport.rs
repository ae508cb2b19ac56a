//! # Transport
//!
//! Codecs translating agent messages to and from HTTP requests and
//! responses. Clients use an [`Outbound`] codec to encode requests and
//! decode responses; servers use an [`Inbound`] codec to accept and decode
//! requests and encode responses.
//!
//! Two transports are provided:
//!
//! - [`car`]: the message is the CAR-encoded body.
//! - [`headercar`]: the message travels gzipped in the `X-Agent-Message`
//!   header, leaving the body free for handler data (content retrieval).

pub mod car;
pub mod headercar;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::message::AgentMessage;
use crate::{Error, Result};

/// An HTTP request carrying an agent message.
pub type Request = http::Request<Bytes>;

/// An HTTP response carrying an agent message.
pub type Response = http::Response<Bytes>;

/// Client-side codec.
pub trait Outbound: Send + Sync {
    /// Encode `message` as a request.
    ///
    /// # Errors
    ///
    /// Fails when the message cannot be encoded for this transport.
    fn encode(&self, message: &AgentMessage) -> Result<Request>;

    /// Decode the agent message in `response`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Http`] on a non-success status, and when the
    /// response does not carry a valid agent message.
    fn decode(&self, response: Response) -> Result<AgentMessage>;
}

/// Server-side codec.
pub trait Inbound: Send + Sync {
    /// Check the request can be handled by this codec (content type and
    /// accepted response types).
    ///
    /// # Errors
    ///
    /// Fails with an [`Error::Http`] carrying the status to respond with.
    fn accept(&self, request: &Request) -> Result<()>;

    /// Decode the agent message in `request`.
    ///
    /// # Errors
    ///
    /// Fails when the request does not carry a valid agent message.
    fn decode(&self, request: &Request) -> Result<AgentMessage>;

    /// Encode `message` as a response, with `body` as the response data
    /// where the transport supports it.
    ///
    /// # Errors
    ///
    /// Fails when the message cannot be encoded.
    fn encode(&self, message: &AgentMessage, body: Option<Payload>) -> Result<Response>;

    /// Whether requests are single-invocation retrievals that may need
    /// their proofs sent over several rounds.
    fn is_retrieval(&self) -> bool {
        false
    }
}

/// Data returned by a handler alongside its receipt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,
}

impl Payload {
    /// Create a `200 OK` payload with the given body.
    #[must_use]
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Set the payload's status.
    #[must_use]
    pub const fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a header to the payload.
    #[must_use]
    pub fn header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Convert a result into an HTTP response.
pub trait IntoHttp {
    /// Convert into an HTTP response, mapping errors to a JSON body with
    /// an appropriate status.
    fn into_http(self) -> Response;
}

impl IntoHttp for Result<Response> {
    fn into_http(self) -> Response {
        match self {
            Ok(response) => response,
            Err(e) => error_response(&e),
        }
    }
}

/// The HTTP response for `error`: `{name, message}` JSON with the error's
/// status.
#[must_use]
pub fn error_response(error: &Error) -> Response {
    if let Error::Http(http) = error {
        return json_response(http.status, http.headers.clone(), &error.to_json());
    }
    let status = match error {
        Error::HeaderTooLarge { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        Error::MissingHeader(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::Codec(_) | Error::DataIntegrity { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_response(status, HeaderMap::new(), &error.to_json())
}

/// A JSON response.
pub(crate) fn json_response(
    status: StatusCode, headers: HeaderMap, body: &serde_json::Value,
) -> Response {
    let mut response = http::Response::new(Bytes::from(body.to_string()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Check a non-success response, returning its status and headers as an
/// error.
pub(crate) fn check_status(response: &Response) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }
    let message = String::from_utf8_lossy(response.body()).into_owned();
    Err(Error::Http(
        crate::HttpError::new(response.status(), message).headers(response.headers().clone()),
    ))
}
