//! # Client
//!
//! The `client` module sends invocations to a service and reads back the
//! receipts. A [`Connection`] pairs the service's identity with an
//! outbound codec and a [`Channel`] carrying HTTP requests to the service.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use credibil_ucan::client::{self, Connection};
//! use credibil_ucan::transport::car;
//!
//! let conn = Connection::new(service_did, car::Outbound, channel);
//! let invocation = InvocationBuilder::new()
//!     .audience(&service_did)
//!     .capability(Capability::new("debug/echo", alice.did().as_str()))
//!     .build(&alice)?;
//!
//! let reply = client::execute(&[invocation.clone()], &conn).await?;
//! let receipt = reply.receipt(&invocation.link()).expect("should have receipt");
//! ```

pub mod retrieval;

use std::future::Future;

use tracing::debug;

pub use self::retrieval::{RetrievalOptions, RetrievalResponse, execute_retrieval};
use crate::Result;
use crate::invocation::Invocation;
use crate::message::AgentMessage;
use crate::principal::{Did, Principal};
use crate::transport::{Outbound, Request, Response};

/// Carries HTTP requests to a service.
pub trait Channel: Send + Sync {
    /// Send `request`, returning the service's response.
    ///
    /// # Errors
    ///
    /// Fails when the request cannot be delivered.
    fn request(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;
}

/// A connection to a service.
#[derive(Clone, Debug)]
pub struct Connection<O, C> {
    id: Did,
    codec: O,
    channel: C,
}

impl<O: Outbound, C: Channel> Connection<O, C> {
    /// Create a connection to the service identified by `id`.
    pub fn new(id: &(impl Principal + ?Sized), codec: O, channel: C) -> Self {
        Self {
            id: id.did(),
            codec,
            channel,
        }
    }

    /// The service's DID.
    #[must_use]
    pub const fn id(&self) -> &Did {
        &self.id
    }

    /// The outbound codec.
    #[must_use]
    pub const fn codec(&self) -> &O {
        &self.codec
    }

    /// The channel.
    #[must_use]
    pub const fn channel(&self) -> &C {
        &self.channel
    }
}

/// Send `invocations` to the service, returning its reply. Receipts in the
/// reply are looked up by invocation link with [`AgentMessage::receipt`].
///
/// # Errors
///
/// Fails when the request cannot be encoded or delivered, or the response
/// is not a valid agent message.
pub async fn execute<O: Outbound, C: Channel>(
    invocations: &[Invocation], conn: &Connection<O, C>,
) -> Result<AgentMessage> {
    let message = AgentMessage::build(invocations, &[])?;
    let request = conn.codec.encode(&message)?;
    debug!("sending {} invocations to {}", invocations.len(), conn.id);

    let response = conn.channel.request(request).await?;
    conn.codec.decode(response)
}

#[cfg(feature = "server")]
mod local {
    use tokio_util::sync::CancellationToken;

    use super::Channel;
    use crate::Result;
    use crate::provider::Provider;
    use crate::server::Server;
    use crate::transport::{IntoHttp, Request, Response};

    // An in-process channel to a server.
    impl<P: Provider + 'static> Channel for Server<P> {
        async fn request(&self, request: Request) -> Result<Response> {
            Ok(Self::request(self, &CancellationToken::new(), request).await.into_http())
        }
    }
}
