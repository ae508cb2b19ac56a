//! # Handlers
//!
//! A service method pairs a capability parser with the async function
//! run once an invocation of the capability has been validated.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use ipld_core::ipld::Ipld;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::capability::{Capability, CapabilityParser, Match, Parser};
use crate::invocation::Invocation;
use crate::outcome::{Failure, Outcome};
use crate::receipt::Effect;
use crate::transport::Payload;
use crate::validator::Authorization;
use crate::{Link, Result};

/// What a handler is given to run an invocation.
#[derive(Clone, Debug)]
pub struct Context {
    /// The invocation being run.
    pub invocation: Invocation,

    /// The invoked capability.
    pub capability: Capability,

    /// The validated proof chain.
    pub authorization: Authorization,

    /// Cancelled when the request is abandoned.
    pub cancel: CancellationToken,
}

/// The result of running a handler.
#[derive(Clone, Debug)]
pub struct Response {
    /// The invocation's outcome.
    pub out: Outcome<Ipld, Ipld>,

    /// Invocations started without awaiting their result.
    pub fork: Vec<Effect>,

    /// An invocation whose result is the final result.
    pub join: Option<Effect>,

    /// Data returned alongside the receipt (header CAR transport only).
    pub body: Option<Payload>,
}

impl Response {
    /// A successful response.
    ///
    /// # Errors
    ///
    /// Fails when `value` cannot be represented as IPLD.
    pub fn ok(value: impl Serialize) -> Result<Self> {
        Ok(Self::from_outcome(Outcome::Ok(ipld_core::serde::to_ipld(value)?)))
    }

    /// A failed response.
    ///
    /// # Errors
    ///
    /// Fails when `error` cannot be represented as IPLD.
    pub fn error(error: impl Serialize) -> Result<Self> {
        Ok(Self::from_outcome(Outcome::Error(ipld_core::serde::to_ipld(error)?)))
    }

    /// A response with the given outcome.
    #[must_use]
    pub const fn from_outcome(out: Outcome<Ipld, Ipld>) -> Self {
        Self {
            out,
            fork: Vec::new(),
            join: None,
            body: None,
        }
    }

    /// Add a forked effect.
    #[must_use]
    pub fn fork(mut self, effect: impl Into<Effect>) -> Self {
        self.fork.push(effect.into());
        self
    }

    /// Set the joined effect.
    #[must_use]
    pub fn join(mut self, effect: impl Into<Effect>) -> Self {
        self.join = Some(effect.into());
        self
    }

    /// Return `body` as the response data.
    #[must_use]
    pub fn body(mut self, body: Payload) -> Self {
        self.body = Some(body);
        self
    }
}

impl From<&Failure> for Response {
    fn from(failure: &Failure) -> Self {
        let error = ipld_core::serde::to_ipld(failure)
            .unwrap_or_else(|_| Ipld::String(failure.to_string()));
        Self::from_outcome(Outcome::Error(error))
    }
}

/// A type-erased handler function.
pub type HandlerFn =
    Arc<dyn Fn(Context) -> BoxFuture<'static, anyhow::Result<Response>> + Send + Sync>;

/// A service method: the parser for the capability it handles and the
/// function handling it.
#[derive(Clone)]
pub struct Method {
    pub(crate) parser: Arc<dyn CapabilityParser>,
    pub(crate) handler: HandlerFn,
}

impl Method {
    /// The ability the method handles.
    #[must_use]
    pub fn can(&self) -> &str {
        self.parser.can()
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method").field("parser", &self.parser).finish_non_exhaustive()
    }
}

/// Create a method handling capabilities read by `parser` with `handler`.
/// The handler receives the capability with typed caveats.
pub fn provide<C, F, Fut>(parser: Parser<C>, handler: F) -> Method
where
    C: DeserializeOwned + Send + 'static,
    F: Fn(Match<C>, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    let reader = parser.clone();
    let handler = Arc::new(handler);
    let handler: HandlerFn = Arc::new(move |ctx: Context| {
        let handler = Arc::clone(&handler);
        let matched = reader.read(&ctx.capability);
        Box::pin(async move {
            let matched = matched.map_err(|e| anyhow::anyhow!("invalid capability: {e:?}"))?;
            handler(matched, ctx).await
        })
    });
    Method {
        parser: Arc::new(parser),
        handler,
    }
}

/// Errors dispatching an invocation to its handler.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// An invocation must carry exactly one capability.
    #[error("invocation {link} must have exactly one capability, found {count}")]
    InvocationCapability {
        /// The invocation.
        link: Link,
        /// Number of capabilities found.
        count: usize,
    },

    /// No handler is registered for the invoked ability.
    #[error("service does not implement {{can: \"{can}\"}}")]
    HandlerNotFound {
        /// The invoked ability.
        can: String,
    },

    /// The handler failed.
    #[error("handler for {can} failed: {message}")]
    HandlerExecution {
        /// The invoked ability.
        can: String,
        /// The handler's error.
        message: String,
    },

    /// A retrieval request must carry exactly one invocation.
    #[error("agent message must have exactly one invocation, found {count}")]
    AgentMessageInvocationCount {
        /// Number of invocations found.
        count: usize,
    },
}

impl DispatchError {
    /// The stable error name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InvocationCapability { .. } => "InvocationCapabilityError",
            Self::HandlerNotFound { .. } => "HandlerNotFoundError",
            Self::HandlerExecution { .. } => "HandlerExecutionError",
            Self::AgentMessageInvocationCount { .. } => "AgentMessageInvocationCountError",
        }
    }
}

impl From<&DispatchError> for Failure {
    fn from(error: &DispatchError) -> Self {
        Self::named(error.name(), error.to_string())
    }
}
