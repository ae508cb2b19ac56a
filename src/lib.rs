//! # UCAN Invocation Runtime
//!
//! A client/server runtime letting holders of signed, content-addressed
//! [UCAN] delegations invoke capabilities against a service and receive
//! signed receipts of the outcome.
//!
//! Delegations, invocations, and receipts are immutable DAGs of
//! content-addressed blocks. Agents exchange them in agent messages over
//! HTTP: either as a CAR-encoded body, or in a header (leaving the body
//! free for retrieved content). The service validates each invocation's
//! proof chain before running the handler registered for the invoked
//! ability, and answers with a receipt signed by the service.
//!
//! The crate works on [`http`] requests and responses; binding them to a
//! socket is left to the host application.
//!
//! [UCAN]: https://github.com/ucan-wg/spec/tree/0.9.1

pub mod capability;
#[cfg(feature = "client")]
pub mod client;
pub mod delegation;
mod error;
pub mod invocation;
pub mod message;
pub mod multiformat;
pub mod outcome;
pub mod principal;
pub mod provider;
pub mod receipt;
#[cfg(feature = "server")]
pub mod server;
pub mod signature;
pub mod store;
pub mod transport;
pub mod ucan;
#[cfg(feature = "server")]
pub mod validator;

pub use crate::capability::Capability;
pub use crate::delegation::{Delegation, DelegationBuilder, Proof};
pub use crate::error::{Error, HttpError};
pub use crate::invocation::{Invocation, InvocationBuilder};
pub use crate::message::AgentMessage;
pub use crate::outcome::{Failure, Outcome};
pub use crate::provider::Provider;
pub use crate::receipt::{Receipt, ReceiptBuilder};

/// A content identifier linking to a block.
pub type Link = ipld_core::cid::Cid;

/// Result type for UCAN operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
