//! # Agent Message
//!
//! The envelope exchanged between agents and services. A request message
//! lists the invocations to execute; a response message reports receipts
//! keyed by the link of the invocation they are for.
//!
//! ```text
//! {"ucanto/message@7.0.0": {execute: [link], report: {keys: [..], values: {key: link}}}}
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::invocation::Invocation;
use crate::receipt::Receipt;
use crate::store::{Block, BlockStore, Codec};
use crate::{Link, Result, unexpected};

/// Agent message version tag.
pub const VERSION: &str = "ucanto/message@7.0.0";

/// The message as stored in its root block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageModel {
    /// The message body.
    #[serde(rename = "ucanto/message@7.0.0")]
    pub message: MessageBody,
}

/// The body of an agent message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Links to invocations to execute.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execute: Vec<Link>,

    /// Receipts, keyed by invocation link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
}

/// Receipts keyed by the string form of the invocation link, with the keys
/// listed in collection order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Keys in order.
    pub keys: Vec<String>,

    /// Receipt link by key.
    pub values: BTreeMap<String, Link>,
}

/// An agent message, materialized over a block store.
#[derive(Clone, Debug)]
pub struct AgentMessage {
    root: Block,
    data: MessageModel,
    blocks: Arc<BlockStore>,
}

impl AgentMessage {
    /// Build a message carrying `invocations` and `receipts`. When several
    /// receipts are for the same invocation, the first is kept.
    ///
    /// # Errors
    ///
    /// Fails when the message cannot be encoded.
    pub fn build(invocations: &[Invocation], receipts: &[Receipt]) -> Result<Self> {
        let execute = invocations.iter().map(|i| i.link()).collect();
        let blocks = invocations.iter().flat_map(|i| i.export(&[]));
        Self::from_parts(execute, receipts, blocks)
    }

    /// Build a message executing the invocations linked by `execute`,
    /// carrying `blocks` (which need not hold the invocations themselves).
    ///
    /// # Errors
    ///
    /// Fails when the message cannot be encoded.
    pub fn from_parts(
        execute: Vec<Link>, receipts: &[Receipt], blocks: impl IntoIterator<Item = Block>,
    ) -> Result<Self> {
        let mut store: BlockStore = blocks.into_iter().collect();

        let mut report: Option<Report> = None;
        for receipt in receipts {
            let report = report.get_or_insert_with(Report::default);
            let key = receipt.ran().to_string();
            if report.values.contains_key(&key) {
                continue;
            }
            store.put_all(receipt.export());
            report.keys.push(key.clone());
            report.values.insert(key, receipt.link());
        }

        let data = MessageModel {
            message: MessageBody { execute, report },
        };
        let root = Block::encode(&data, Codec::DagCbor)?;
        store.put(root.clone());

        Ok(Self {
            root,
            data,
            blocks: Arc::new(store),
        })
    }

    /// Create a view of the message rooted at `root` over `blocks`.
    ///
    /// # Errors
    ///
    /// Fails when `root` is not in `blocks` or does not decode to a message.
    pub fn view(root: &Link, blocks: impl Into<Arc<BlockStore>>) -> Result<Self> {
        let blocks = blocks.into();
        let Some(block) = blocks.get(root) else {
            return Err(unexpected!("missing agent message block {root}"));
        };
        let data = block.decode::<MessageModel>()?;
        Ok(Self {
            root: block.clone(),
            data,
            blocks,
        })
    }

    /// The message's root block.
    #[must_use]
    pub const fn root(&self) -> &Block {
        &self.root
    }

    /// The message's link.
    #[must_use]
    pub const fn link(&self) -> Link {
        *self.root.link()
    }

    /// The decoded message.
    #[must_use]
    pub const fn data(&self) -> &MessageModel {
        &self.data
    }

    /// Every block in the message.
    #[must_use]
    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    /// A shared handle to the message's blocks.
    #[must_use]
    pub fn store(&self) -> Arc<BlockStore> {
        Arc::clone(&self.blocks)
    }

    /// Links to the invocations to execute.
    #[must_use]
    pub fn invocation_links(&self) -> &[Link] {
        &self.data.message.execute
    }

    /// The invocation linked by `link`, if its blocks are in the message.
    #[must_use]
    pub fn invocation(&self, link: &Link) -> Option<Invocation> {
        Invocation::view(link, Arc::clone(&self.blocks)).ok()
    }

    /// The invocations whose blocks are in the message.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.data.message.execute.iter().filter_map(|link| self.invocation(link)).collect()
    }

    /// The link of the receipt for the invocation linked by `invocation`.
    #[must_use]
    pub fn get(&self, invocation: &Link) -> Option<Link> {
        let report = self.data.message.report.as_ref()?;
        report.values.get(&invocation.to_string()).copied()
    }

    /// The receipt for the invocation linked by `invocation`.
    #[must_use]
    pub fn receipt(&self, invocation: &Link) -> Option<Receipt> {
        let link = self.get(invocation)?;
        Receipt::view(&link, Arc::clone(&self.blocks)).ok()
    }

    /// Every receipt in the message, in report order.
    #[must_use]
    pub fn receipts(&self) -> Vec<Receipt> {
        let Some(report) = &self.data.message.report else {
            return Vec::new();
        };
        report
            .keys
            .iter()
            .filter_map(|key| report.values.get(key))
            .filter_map(|link| Receipt::view(link, Arc::clone(&self.blocks)).ok())
            .collect()
    }
}
