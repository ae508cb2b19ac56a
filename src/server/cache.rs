//! # Delegation Cache
//!
//! A size-bounded, least-recently-used cache of the delegation blocks a
//! server has received. Proofs sent in earlier requests are served from
//! the cache, so each proof need only cross the wire once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::Link;
use crate::store::Block;

/// An LRU cache of blocks, keyed by link.
#[derive(Debug)]
pub struct DelegationCache {
    capacity: usize,
    inner: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    blocks: HashMap<Link, Block>,
    order: VecDeque<Link>,
}

impl DelegationCache {
    /// Create a cache holding at most `capacity` blocks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Entries::default()),
        }
    }

    /// Add `block`, evicting the least recently used blocks when full.
    pub fn put(&self, block: Block) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        let link = *block.link();
        if entries.blocks.insert(link, block).is_some() {
            entries.touch(&link);
            return;
        }
        entries.order.push_back(link);

        while entries.order.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.blocks.remove(&oldest);
        }
    }

    /// The block linked by `link`, marking it as recently used.
    #[must_use]
    pub fn get(&self, link: &Link) -> Option<Block> {
        let mut entries = self.lock();
        let block = entries.blocks.get(link).cloned()?;
        entries.touch(link);
        Some(block)
    }

    /// Number of cached blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().blocks.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Entries {
    fn touch(&mut self, link: &Link) {
        if let Some(pos) = self.order.iter().position(|l| l == link) {
            self.order.remove(pos);
            self.order.push_back(*link);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Codec;

    fn block(n: u32) -> Block {
        Block::encode(&n, Codec::DagCbor).expect("should encode")
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = DelegationCache::new(2);
        let (one, two, three) = (block(1), block(2), block(3));

        cache.put(one.clone());
        cache.put(two.clone());
        assert!(cache.get(one.link()).is_some());

        cache.put(three.clone());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(two.link()).is_none());
        assert!(cache.get(one.link()).is_some());
        assert!(cache.get(three.link()).is_some());
    }

    #[test]
    fn zero_capacity() {
        let cache = DelegationCache::new(0);
        cache.put(block(1));
        assert!(cache.is_empty());
    }
}
