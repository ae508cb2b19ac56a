//! # Counting Channel
//!
//! Wraps an in-process server, recording the status of every response and
//! the proofs requested by `510` responses, so tests can follow round trips.

use std::sync::{Arc, Mutex};

use credibil_ucan::client::{Channel, retrieval};
use credibil_ucan::provider::Provider;
use credibil_ucan::server::Server;
use credibil_ucan::transport::{Request, Response};
use credibil_ucan::{Link, Result};

#[derive(Clone, Debug)]
pub struct CountingChannel<P> {
    server: Server<P>,
    statuses: Arc<Mutex<Vec<u16>>>,
    missing: Arc<Mutex<Vec<Link>>>,
}

impl<P: Provider + 'static> CountingChannel<P> {
    #[must_use]
    pub fn new(server: Server<P>) -> Self {
        Self {
            server,
            statuses: Arc::new(Mutex::new(Vec::new())),
            missing: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of requests sent.
    #[must_use]
    pub fn count(&self) -> usize {
        self.statuses.lock().expect("should lock").len()
    }

    /// The status of each response, in order.
    #[must_use]
    pub fn statuses(&self) -> Vec<u16> {
        self.statuses.lock().expect("should lock").clone()
    }

    /// The proofs requested by `510` responses, in order.
    #[must_use]
    pub fn missing(&self) -> Vec<Link> {
        self.missing.lock().expect("should lock").clone()
    }
}

impl<P: Provider + 'static> Channel for CountingChannel<P> {
    async fn request(&self, request: Request) -> Result<Response> {
        let response = Channel::request(&self.server, request).await?;
        self.statuses.lock().expect("should lock").push(response.status().as_u16());
        if response.status().as_u16() == 510 {
            let proofs = retrieval::read_missing_proofs(response.body())?;
            self.missing.lock().expect("should lock").extend(proofs);
        }
        Ok(response)
    }
}
