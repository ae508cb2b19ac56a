//! # Test Utilities
//!
//! Fixed identities, an in-memory provider, and a request-counting channel
//! shared by the integration tests.

mod channel;
mod identity;
mod provider;

use std::sync::Once;

pub use self::channel::CountingChannel;
pub use self::identity::{ALICE, BOB, CAROL, MALLORY, SERVICE, signer};
pub use self::provider::Provider;

static TRACING: Once = Once::new();

/// Initialise a `tracing` subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
