//! # Server
//!
//! An invocation server. The server accepts agent messages over HTTP,
//! validates each invocation against the handler registered for its
//! ability, runs the handlers concurrently, and responds with an agent
//! message of signed receipts.
//!
//! ```rust,ignore
//! let server = Server::builder(signer)
//!     .provider(provider)
//!     .method(handler::provide(Parser::<Echo>::new("debug/echo"), echo))
//!     .build();
//! let response = server.request(&CancellationToken::new(), request).await.into_http();
//! ```

mod cache;
pub mod handler;
pub mod retrieval;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use futures::FutureExt;
use http::{HeaderMap, StatusCode};
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use self::cache::DelegationCache;
pub use self::handler::{Context, DispatchError, Method, provide};
use self::retrieval::Assembly;
use crate::invocation::Invocation;
use crate::message::AgentMessage;
use crate::outcome::Failure;
use crate::principal::{self, Did, Signer};
use crate::provider::Provider;
use crate::receipt::{Receipt, ReceiptBuilder};
use crate::transport::{self, Inbound, Payload, Request, Response, headercar, json_response};
use crate::validator::{self, CanIssue, ValidationContext};
use crate::{Error, Link, Result};

/// Default number of blocks held in the delegation cache.
pub const DEFAULT_CACHE_SIZE: usize = 1024;

/// Default maximum size of an inbound `X-Agent-Message` header.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 4096;

/// Receives errors raised by handlers.
pub type Catch = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// An invocation server.
pub struct Server<P> {
    inner: Arc<Inner<P>>,
}

struct Inner<P> {
    signer: Arc<dyn Signer>,
    codec: Arc<dyn Inbound>,
    methods: HashMap<String, Method>,
    catch: Option<Catch>,
    can_issue: CanIssue,
    principal_parser: principal::Parser,
    alternative_audiences: Vec<Did>,
    max_header_size: usize,
    cache: DelegationCache,
    bodies: Mutex<HashMap<Link, Payload>>,
    provider: P,
}

impl<P> Clone for Server<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> fmt::Debug for Server<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.inner.signer.did())
            .field("methods", &self.inner.methods.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Server<NoProvider> {
    /// Start building a server signing receipts with `signer`.
    #[must_use]
    pub fn builder(signer: impl Signer + 'static) -> ServerBuilder<NoProvider> {
        ServerBuilder::new(signer)
    }
}

impl<P: Provider + 'static> Server<P> {
    /// The service's DID.
    #[must_use]
    pub fn id(&self) -> Did {
        self.inner.signer.did()
    }

    /// The delegation cache.
    #[must_use]
    pub fn cache(&self) -> &DelegationCache {
        &self.inner.cache
    }

    /// Handle an HTTP request carrying an agent message.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Http`] when the request is rejected by the codec
    /// (use [`transport::IntoHttp`] to turn errors into responses), and with
    /// [`Error::Cancelled`] when `ctx` is cancelled.
    pub async fn request(&self, ctx: &CancellationToken, request: Request) -> Result<Response> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let size = headercar::header(request.headers()).map_or(0, str::len);
        if size > self.inner.max_header_size {
            warn!("rejecting request: header of {size} bytes exceeds maximum");
            let error = Error::HeaderTooLarge {
                size,
                max: self.inner.max_header_size,
            };
            return Ok(transport::error_response(&error));
        }

        self.inner.codec.accept(&request)?;
        let message = self.inner.codec.decode(&request)?;
        debug!(
            "received agent message {} with {} invocations",
            message.link(),
            message.invocation_links().len()
        );

        let invocations = if self.inner.codec.is_retrieval() {
            let [link] = message.invocation_links() else {
                let error = DispatchError::AgentMessageInvocationCount {
                    count: message.invocation_links().len(),
                };
                warn!("rejecting request: {error}");
                let body = json!({"name": error.name(), "message": error.to_string()});
                return Ok(json_response(StatusCode::BAD_REQUEST, HeaderMap::new(), &body));
            };
            match self.assemble(&message, link).await? {
                Assembly::Complete(invocation) => vec![invocation],
                Assembly::Missing(proof) => return Ok(retrieval::missing_proofs(proof)),
            }
        } else {
            message
                .invocation_links()
                .iter()
                .map(|link| Invocation::view(link, message.store()))
                .collect::<Result<Vec<_>>>()?
        };

        let links: Vec<Link> = invocations.iter().map(|i| i.link()).collect();
        let receipts = match self.execute(ctx, invocations).await {
            Ok(receipts) => receipts,
            Err(e) => {
                let mut bodies = self.bodies();
                for link in &links {
                    bodies.remove(link);
                }
                return Err(e);
            }
        };
        let reply = AgentMessage::build(&[], &receipts)?;

        let mut body = None;
        for link in &links {
            if let Some(payload) = self.take_body(link) {
                body.get_or_insert(payload);
            }
        }
        self.inner.codec.encode(&reply, body)
    }

    /// Run `invocations` concurrently, returning their receipts in
    /// completion order.
    ///
    /// # Errors
    ///
    /// Fails when `ctx` is cancelled or a receipt cannot be issued.
    pub async fn execute(
        &self, ctx: &CancellationToken, invocations: Vec<Invocation>,
    ) -> Result<Vec<Receipt>> {
        let mut tasks = JoinSet::new();
        for invocation in invocations {
            let server = self.clone();
            let cancel = ctx.child_token();
            tasks.spawn(async move { server.invoke(invocation, cancel).await });
        }

        let mut receipts = Vec::new();
        let result = loop {
            tokio::select! {
                () = ctx.cancelled() => break Err(Error::Cancelled),
                next = tasks.join_next() => match next {
                    None => break Ok(()),
                    Some(Ok(Ok(receipt))) => receipts.push(receipt),
                    Some(Ok(Err(e))) => break Err(e),
                    Some(Err(e)) => {
                        break Err(Error::Server(format!("invocation task failed: {e}")));
                    }
                }
            }
        };

        if let Err(e) = result {
            // aborted tasks must finish before their bodies are discarded
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            return Err(e);
        }
        Ok(receipts)
    }

    /// Run a single invocation and issue its receipt.
    ///
    /// # Errors
    ///
    /// Fails when the receipt cannot be issued.
    pub async fn invoke(
        &self, invocation: Invocation, cancel: CancellationToken,
    ) -> Result<Receipt> {
        let link = invocation.link();
        let response = match self.run(&invocation, cancel).await {
            Ok(response) => response,
            Err(failure) => handler::Response::from(&failure),
        };

        let mut builder = ReceiptBuilder::new(link).out(response.out);
        for effect in response.fork {
            builder = builder.fork(effect);
        }
        if let Some(effect) = response.join {
            builder = builder.join(effect);
        }
        if let Some(body) = response.body {
            self.bodies().insert(link, body);
        }
        builder.build(&self.inner.signer)
    }

    async fn run(
        &self, invocation: &Invocation, cancel: CancellationToken,
    ) -> Result<handler::Response, Failure> {
        let Some(capability) = invocation.capability() else {
            let error = DispatchError::InvocationCapability {
                link: invocation.link(),
                count: invocation.capabilities().len(),
            };
            return Err(Failure::from(&error));
        };
        let Some(method) = self.inner.methods.get(&capability.can) else {
            let error = DispatchError::HandlerNotFound {
                can: capability.can.clone(),
            };
            return Err(Failure::from(&error));
        };

        let ctx = ValidationContext::new(
            self.inner.signer.verifier(),
            Arc::clone(&method.parser),
            self.inner.provider.clone(),
        )
        .alternative_audiences(self.inner.alternative_audiences.clone())
        .can_issue(Arc::clone(&self.inner.can_issue))
        .principal_parser(self.inner.principal_parser.clone());

        let authorization = validator::access(invocation, &ctx).await.map_err(|e| {
            warn!("invocation {} is unauthorized", invocation.link());
            Failure::from(&e)
        })?;

        debug!("running {} for invocation {}", capability.can, invocation.link());
        let context = Context {
            invocation: invocation.clone(),
            capability: capability.clone(),
            authorization,
            cancel,
        };
        let outcome = AssertUnwindSafe(async { (method.handler)(context).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(anyhow!("handler panicked: {}", panic_message(&*panic))));

        outcome.map_err(|e| {
            let error = DispatchError::HandlerExecution {
                can: capability.can.clone(),
                message: e.to_string(),
            };
            warn!("{error}");
            if let Some(catch) = &self.inner.catch {
                catch(&error);
            }
            Failure::from(&error)
        })
    }

    /// Remove and return the body produced for `invocation`.
    #[must_use]
    pub fn take_body(&self, invocation: &Link) -> Option<Payload> {
        self.bodies().remove(invocation)
    }

    fn bodies(&self) -> MutexGuard<'_, HashMap<Link, Payload>> {
        self.inner.bodies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

/// Provider not set on [`ServerBuilder`].
#[doc(hidden)]
#[derive(Clone, Debug)]
pub struct NoProvider;

/// Provider has been set on [`ServerBuilder`].
#[doc(hidden)]
pub struct WithProvider<P: Provider>(P);

/// Builds a [`Server`].
pub struct ServerBuilder<P> {
    signer: Arc<dyn Signer>,
    codec: Arc<dyn Inbound>,
    methods: HashMap<String, Method>,
    catch: Option<Catch>,
    can_issue: CanIssue,
    principal_parser: principal::Parser,
    alternative_audiences: Vec<Did>,
    max_header_size: usize,
    cache_size: usize,
    provider: P,
}

impl ServerBuilder<NoProvider> {
    /// Create a builder for a server signing receipts with `signer`,
    /// accepting the CAR transport.
    #[must_use]
    pub fn new(signer: impl Signer + 'static) -> Self {
        Self {
            signer: Arc::new(signer),
            codec: Arc::new(transport::car::Inbound),
            methods: HashMap::new(),
            catch: None,
            can_issue: Arc::new(validator::can_issue),
            principal_parser: principal::Parser::default(),
            alternative_audiences: Vec::new(),
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            provider: NoProvider,
        }
    }

    /// Set the provider used to resolve proofs and DID keys and to check
    /// revocation.
    #[must_use]
    pub fn provider<P: Provider>(self, provider: P) -> ServerBuilder<WithProvider<P>> {
        ServerBuilder {
            signer: self.signer,
            codec: self.codec,
            methods: self.methods,
            catch: self.catch,
            can_issue: self.can_issue,
            principal_parser: self.principal_parser,
            alternative_audiences: self.alternative_audiences,
            max_header_size: self.max_header_size,
            cache_size: self.cache_size,
            provider: WithProvider(provider),
        }
    }
}

impl<P> ServerBuilder<P> {
    /// Set the inbound codec.
    #[must_use]
    pub fn codec(mut self, codec: impl Inbound + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Register a method. A method registered for the same ability
    /// replaces the previous one.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.methods.insert(method.can().to_string(), method);
        self
    }

    /// Receive errors raised by handlers.
    #[must_use]
    pub fn catch(mut self, catch: impl Fn(&DispatchError) + Send + Sync + 'static) -> Self {
        self.catch = Some(Arc::new(catch));
        self
    }

    /// Replace the self-issue rule.
    #[must_use]
    pub fn can_issue(
        mut self, can_issue: impl Fn(&crate::Capability, &Did) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.can_issue = Arc::new(can_issue);
        self
    }

    /// Replace the parser used for `did:key` issuers.
    #[must_use]
    pub fn principal_parser(mut self, parser: principal::Parser) -> Self {
        self.principal_parser = parser;
        self
    }

    /// Accept invocations addressed to `audience` as well as the service.
    #[must_use]
    pub fn alternative_audience(mut self, audience: Did) -> Self {
        self.alternative_audiences.push(audience);
        self
    }

    /// Set the maximum size of an inbound `X-Agent-Message` header.
    #[must_use]
    pub const fn max_header_size(mut self, max_header_size: usize) -> Self {
        self.max_header_size = max_header_size;
        self
    }

    /// Set the number of blocks held in the delegation cache.
    #[must_use]
    pub const fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }
}

impl<P: Provider> ServerBuilder<WithProvider<P>> {
    /// Build the server.
    #[must_use]
    pub fn build(self) -> Server<P> {
        Server {
            inner: Arc::new(Inner {
                signer: self.signer,
                codec: self.codec,
                methods: self.methods,
                catch: self.catch,
                can_issue: self.can_issue,
                principal_parser: self.principal_parser,
                alternative_audiences: self.alternative_audiences,
                max_header_size: self.max_header_size,
                cache: DelegationCache::new(self.cache_size),
                bodies: Mutex::new(HashMap::new()),
                provider: self.provider.0,
            }),
        }
    }
}
