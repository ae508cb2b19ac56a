//! # Retrieval
//!
//! Header CAR requests carry a single invocation whose proofs may arrive
//! over several rounds. Blocks from every round are cached, and the
//! invocation's proof chain is assembled from the current message, the
//! cache, and the proof resolver. When a proof cannot be found, the client
//! is asked for it with a `510 Not Extended` response.

use http::{HeaderMap, StatusCode};
use serde_json::json;
use tracing::debug;

use super::Server;
use super::cache::DelegationCache;
use crate::invocation::Invocation;
use crate::message::AgentMessage;
use crate::provider::Provider;
use crate::store::BlockStore;
use crate::transport::{Response, json_response};
use crate::ucan::UcanModel;
use crate::{Error, Link, Result};

/// The result of assembling an invocation.
#[derive(Debug)]
pub enum Assembly {
    /// The invocation and all of its proofs are available.
    Complete(Invocation),

    /// The first proof that could not be found.
    Missing(Link),
}

impl<P: Provider + 'static> Server<P> {
    // Assemble the invocation linked by `link` from the message's blocks,
    // the cache, and the proof resolver.
    pub(super) async fn assemble(&self, message: &AgentMessage, link: &Link) -> Result<Assembly> {
        cache_blocks(&self.inner.cache, message);

        let mut store: BlockStore = message.blocks().iter().cloned().collect();
        let mut pending = vec![*link];

        while let Some(next) = pending.pop() {
            if !store.contains(&next) {
                if let Some(block) = self.inner.cache.get(&next) {
                    store.put(block);
                } else if let Ok(delegation) = self.inner.provider.resolve_proof(&next).await {
                    store.put_all(delegation.export(&[]));
                } else {
                    debug!("proof {next} is missing");
                    return Ok(Assembly::Missing(next));
                }
            }
            let Some(block) = store.get(&next) else {
                return Ok(Assembly::Missing(next));
            };
            let model: UcanModel = block.decode()?;
            pending.extend(model.prf.iter().rev());
        }

        Ok(Assembly::Complete(Invocation::view(link, store)?))
    }
}

// Cache every block in the message except its root.
fn cache_blocks(cache: &DelegationCache, message: &AgentMessage) {
    let root = message.link();
    for block in message.blocks().iter().filter(|block| *block.link() != root) {
        cache.put(block.clone());
    }
}

/// The `510 Not Extended` response asking for the missing proof.
#[must_use]
pub fn missing_proofs(link: Link) -> Response {
    let error = Error::MissingProofs(vec![link]);
    let body = json!({
        "name": error.name(),
        "message": error.to_string(),
        "proofs": [{"/": link.to_string()}],
    });
    json_response(StatusCode::NOT_EXTENDED, HeaderMap::new(), &body)
}
