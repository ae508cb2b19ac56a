//! # Store
//!
//! Content-addressed block storage. A [`BlockStore`] holds the blocks making
//! up a delegation, receipt, or agent message. Stores are scoped to a single
//! value (or request) and are shared read-only once built.

pub mod block;
pub mod car;

use std::collections::HashMap;

pub use self::block::{Block, Codec};
use crate::Link;

/// An insertion-ordered set of blocks, unique by link.
#[derive(Clone, Debug, Default)]
pub struct BlockStore {
    blocks: Vec<Block>,
    index: HashMap<Link, usize>,
}

impl BlockStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block to the store. Adding a block that is already present is
    /// a no-op.
    pub fn put(&mut self, block: Block) {
        if self.index.contains_key(block.link()) {
            return;
        }
        self.index.insert(*block.link(), self.blocks.len());
        self.blocks.push(block);
    }

    /// Add every block yielded by `blocks`.
    pub fn put_all(&mut self, blocks: impl IntoIterator<Item = Block>) {
        for block in blocks {
            self.put(block);
        }
    }

    /// Fetch a block by link.
    #[must_use]
    pub fn get(&self, link: &Link) -> Option<&Block> {
        self.index.get(link).map(|i| &self.blocks[*i])
    }

    /// Whether the store contains a block for `link`.
    #[must_use]
    pub fn contains(&self, link: &Link) -> bool {
        self.index.contains_key(link)
    }

    /// Iterate over blocks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Number of blocks held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl FromIterator<Block> for BlockStore {
    fn from_iter<I: IntoIterator<Item = Block>>(iter: I) -> Self {
        let mut store = Self::new();
        store.put_all(iter);
        store
    }
}

impl IntoIterator for BlockStore {
    type IntoIter = std::vec::IntoIter<Block>;
    type Item = Block;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}
