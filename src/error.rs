//! # UCAN Errors

use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::Link;

/// Runtime errors.
///
/// Every variant carries a stable [`Error::name`] so errors can be reported
/// on the wire (see [`crate::outcome::Failure`]).
#[derive(Error, Debug)]
pub enum Error {
    /// A block's bytes do not hash to the block's link.
    #[error("data integrity error: expected {expected} but bytes hash to {actual}")]
    DataIntegrity {
        /// The link the block claimed.
        expected: Link,
        /// The link recomputed from the block's bytes.
        actual: Link,
    },

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A principal (key or DID) could not be parsed, encoded, or used.
    #[error("principal error: {0}")]
    Principal(String),

    /// Non-success HTTP status or failed content negotiation.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// An encoded `X-Agent-Message` header exceeds the configured maximum.
    #[error("header is too large: {size} bytes exceeds maximum of {max} bytes")]
    HeaderTooLarge {
        /// Size of the encoded header.
        size: usize,
        /// Maximum permitted size.
        max: usize,
    },

    /// A required header was absent from a request or response.
    #[error("missing header: {0}")]
    MissingHeader(String),

    /// An invocation could not be sent even one part at a time.
    #[error("invocation is too large to be sent in a header")]
    InvocationTooLarge,

    /// The service cannot resolve one or more proofs.
    #[error("missing proofs: {}", display_links(.0))]
    MissingProofs(Vec<Link>),

    /// The request was cancelled.
    #[error("operation was cancelled")]
    Cancelled,

    /// Placeholder error type until moving to more strongly typed errors.
    #[error("{0}")]
    Unexpected(String),

    /// An unexpected condition in a dependant library.
    #[error("{0}")]
    Server(String),
}

impl Error {
    /// The stable name of the error.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DataIntegrity { .. } => "DataIntegrityError",
            Self::Codec(_) => "CodecError",
            Self::Principal(_) => "PrincipalError",
            Self::Http(_) => "HTTPError",
            Self::HeaderTooLarge { .. } => "HeaderTooLarge",
            Self::MissingHeader(_) => "MissingHeader",
            Self::InvocationTooLarge => "InvocationTooLarge",
            Self::MissingProofs(_) => "MissingProofs",
            Self::Cancelled => "Cancelled",
            Self::Unexpected(_) => "UnexpectedError",
            Self::Server(_) => "ServerError",
        }
    }

    /// Transform the error into a `{name, message}` JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

impl Serialize for Error {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        NamedError {
            name: self.name().to_string(),
            message: self.to_string(),
        }
        .serialize(serializer)
    }
}

fn display_links(links: &[Link]) -> String {
    links.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// An HTTP error: a non-success status, optionally with the response
/// headers received.
#[derive(Error, Debug, Clone)]
#[error("HTTP {status}: {message}")]
pub struct HttpError {
    /// Response status code.
    pub status: StatusCode,

    /// Response headers, if any.
    pub headers: HeaderMap,

    /// Error description.
    pub message: String,
}

impl HttpError {
    /// Create a new error with the provided status and message.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            message: message.into(),
        }
    }

    /// Content type of the request is not supported (415).
    #[must_use]
    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, message)
    }

    /// None of the acceptable response types is supported (406).
    #[must_use]
    pub fn not_acceptable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_ACCEPTABLE, message)
    }

    /// Attach the headers received with the response.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Self::Server(error.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Codec(error.to_string())
    }
}

impl From<ipld_core::serde::SerdeError> for Error {
    fn from(error: ipld_core::serde::SerdeError) -> Self {
        Self::Codec(error.to_string())
    }
}

impl From<cid::Error> for Error {
    fn from(error: cid::Error) -> Self {
        Self::Codec(error.to_string())
    }
}

impl From<multibase::Error> for Error {
    fn from(error: multibase::Error) -> Self {
        Self::Codec(error.to_string())
    }
}

impl From<base64ct::Error> for Error {
    fn from(error: base64ct::Error) -> Self {
        Self::Codec(error.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Server(error.to_string())
    }
}

impl From<http::Error> for Error {
    fn from(error: http::Error) -> Self {
        Self::Server(error.to_string())
    }
}

/// Construct an `Error::Unexpected` error from a string or existing error
/// value.
///
/// This evaluates to an [`Error`][crate::Error]. It can take either just a
/// string, or a format string with arguments. It also can take any custom type
/// which implements `Debug` and `Display`.
///
/// # Example
///
/// ```
/// use credibil_ucan::{unexpected, Result};
///
/// fn lookup(key: &str) -> Result<()> {
///     if key.len() != 16 {
///         return Err(unexpected!("key length must be 16 characters, got {:?}", key));
///     }
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! unexpected {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::Unexpected(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::Error::Unexpected(format!($err))
    };
}

// Error response for serializing errors to JSON.
#[derive(Deserialize, Serialize)]
struct NamedError {
    /// Error name.
    name: String,

    /// Error description.
    message: String,
}
