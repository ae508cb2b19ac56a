//! # Mock Provider
//!
//! An in-memory provider: stored proofs, a DID to `did:key` directory, and
//! a revocation list.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use credibil_ucan::principal::Did;
use credibil_ucan::provider::{self, DidKeyResolver, ProofResolver, RevocationChecker};
use credibil_ucan::{Delegation, Link};

#[derive(Clone, Debug, Default)]
pub struct Provider {
    proofs: Arc<Mutex<HashMap<Link, Delegation>>>,
    keys: Arc<Mutex<HashMap<String, Did>>>,
    revoked: Arc<Mutex<HashSet<Link>>>,
}

impl Provider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `delegation` so it resolves by link.
    pub fn add_proof(&self, delegation: &Delegation) {
        self.proofs.lock().expect("should lock").insert(delegation.link(), delegation.clone());
    }

    /// Resolve `did` to `key`.
    pub fn add_key(&self, did: &Did, key: &Did) {
        self.keys.lock().expect("should lock").insert(did.to_string(), key.clone());
    }

    /// Revoke the delegation linked by `link`.
    pub fn revoke(&self, link: Link) {
        self.revoked.lock().expect("should lock").insert(link);
    }
}

impl provider::Provider for Provider {}

impl ProofResolver for Provider {
    async fn resolve_proof(&self, link: &Link) -> Result<Delegation> {
        let proofs = self.proofs.lock().expect("should lock");
        proofs.get(link).cloned().ok_or_else(|| anyhow!("proof {link} not found"))
    }
}

impl DidKeyResolver for Provider {
    async fn resolve_did_key(&self, did: &Did) -> Result<Did> {
        let keys = self.keys.lock().expect("should lock");
        keys.get(did.as_str()).cloned().ok_or_else(|| anyhow!("unable to resolve {did}"))
    }
}

impl RevocationChecker for Provider {
    async fn check_revocation(&self, delegation: &Delegation) -> Result<()> {
        if self.revoked.lock().expect("should lock").contains(&delegation.link()) {
            return Err(anyhow!("delegation {} has been revoked", delegation.link()));
        }
        Ok(())
    }
}
