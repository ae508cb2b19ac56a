//! # Receipt
//!
//! A receipt is a service's signed statement of the outcome of an
//! invocation. Receipts may list follow-up invocations (effects), either
//! forked (fire and forget) or joined (awaited), forming a graph of
//! execution.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use ipld_core::ipld::Ipld;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::delegation::{self, Delegation, Proof};
use crate::invocation::Invocation;
use crate::outcome::Outcome;
use crate::principal::{Did, Principal, Signer, Verifier};
use crate::signature::Signature;
use crate::store::{Block, BlockStore, Codec};
use crate::{Link, Result, unexpected};

/// Archive descriptor key for receipts.
pub const ARCHIVE_KEY: &str = "ucan-receipt-0.9.1";

/// Links to effects of an invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effects {
    /// Invocations started without awaiting their result.
    pub fork: Vec<Link>,

    /// An invocation whose result is the final result of the invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<Link>,
}

/// The signed part of a receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutcomeModel {
    /// Link to the invocation that ran.
    pub ran: Link,

    /// The invocation's outcome.
    pub out: Outcome<Ipld, Ipld>,

    /// Effects.
    pub fx: Effects,

    /// Additional metadata.
    #[serde(default)]
    pub meta: BTreeMap<String, Ipld>,

    /// The issuer, when the receipt is issued on behalf of a service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<Did>,

    /// Proofs that the issuer may issue receipts for the service.
    #[serde(default)]
    pub prf: Vec<Link>,
}

/// The receipt as stored in a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiptModel {
    /// The outcome.
    pub ocm: OutcomeModel,

    /// Signature over the DAG-CBOR encoding of the outcome.
    pub sig: Signature,
}

/// An invocation, or an effect, either materialized or known by link.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// A materialized invocation.
    Invocation(Invocation),

    /// An invocation known only by its link.
    Link(Link),
}

impl Effect {
    /// The invocation's link.
    #[must_use]
    pub fn link(&self) -> Link {
        match self {
            Self::Invocation(invocation) => invocation.link(),
            Self::Link(link) => *link,
        }
    }
}

impl From<Invocation> for Effect {
    fn from(invocation: Invocation) -> Self {
        Self::Invocation(invocation)
    }
}

impl From<&Invocation> for Effect {
    fn from(invocation: &Invocation) -> Self {
        Self::Invocation(invocation.clone())
    }
}

impl From<Link> for Effect {
    fn from(link: Link) -> Self {
        Self::Link(link)
    }
}

/// A receipt, materialized over a block store.
#[derive(Clone)]
pub struct Receipt {
    root: Block,
    data: Arc<ReceiptModel>,
    blocks: Arc<BlockStore>,
}

impl Receipt {
    /// Create a view of the receipt rooted at `root` over `blocks`.
    ///
    /// # Errors
    ///
    /// Fails when `root` is not in `blocks` or does not decode to a receipt.
    pub fn view(root: &Link, blocks: impl Into<Arc<BlockStore>>) -> Result<Self> {
        let blocks = blocks.into();
        let Some(block) = blocks.get(root) else {
            return Err(unexpected!("missing receipt block {root}"));
        };
        let data = block.decode::<ReceiptModel>()?;
        Ok(Self {
            root: block.clone(),
            data: Arc::new(data),
            blocks,
        })
    }

    /// The receipt's link.
    #[must_use]
    pub const fn link(&self) -> Link {
        *self.root.link()
    }

    /// The root block.
    #[must_use]
    pub const fn root(&self) -> &Block {
        &self.root
    }

    /// The decoded receipt.
    #[must_use]
    pub fn data(&self) -> &ReceiptModel {
        &self.data
    }

    /// Link to the invocation that ran.
    #[must_use]
    pub fn ran(&self) -> Link {
        self.data.ocm.ran
    }

    /// The invocation that ran, when its blocks are available.
    #[must_use]
    pub fn ran_invocation(&self) -> Effect {
        self.effect(self.data.ocm.ran)
    }

    /// The outcome.
    #[must_use]
    pub fn out(&self) -> &Outcome<Ipld, Ipld> {
        &self.data.ocm.out
    }

    /// The outcome, read as typed values.
    ///
    /// # Errors
    ///
    /// Fails when the outcome does not deserialize into `T` or `E`.
    pub fn out_as<T: DeserializeOwned, E: DeserializeOwned>(&self) -> Result<Outcome<T, E>> {
        self.data.ocm.out.to_typed()
    }

    /// Links to effects.
    #[must_use]
    pub fn fx(&self) -> &Effects {
        &self.data.ocm.fx
    }

    /// Forked effects, materialized when available.
    #[must_use]
    pub fn fork(&self) -> Vec<Effect> {
        self.data.ocm.fx.fork.iter().map(|link| self.effect(*link)).collect()
    }

    /// The joined effect, materialized when available.
    #[must_use]
    pub fn join(&self) -> Option<Effect> {
        self.data.ocm.fx.join.map(|link| self.effect(link))
    }

    /// Metadata.
    #[must_use]
    pub fn meta(&self) -> &BTreeMap<String, Ipld> {
        &self.data.ocm.meta
    }

    /// The issuer.
    #[must_use]
    pub fn issuer(&self) -> Option<&Did> {
        self.data.ocm.iss.as_ref()
    }

    /// Proofs, materialized when available.
    #[must_use]
    pub fn proofs(&self) -> Vec<Proof> {
        self.data
            .ocm
            .prf
            .iter()
            .map(|link| {
                Delegation::view(link, Arc::clone(&self.blocks))
                    .map_or(Proof::Link(*link), Proof::Delegation)
            })
            .collect()
    }

    /// The signature.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.data.sig
    }

    /// Every block in the underlying store.
    #[must_use]
    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    /// Check the receipt's signature with `verifier`.
    ///
    /// # Errors
    ///
    /// Fails when the outcome cannot be encoded.
    pub fn verify_signature(&self, verifier: &(impl Verifier + ?Sized)) -> Result<bool> {
        let bytes = Codec::DagCbor.encode(&self.data.ocm)?;
        Ok(verifier.verify(&bytes, &self.data.sig))
    }

    /// Export the blocks of the ran invocation, effects and proofs that are
    /// available, followed by the receipt's root block.
    #[must_use]
    pub fn export(&self) -> Vec<Block> {
        let mut seen = HashSet::new();
        let mut blocks = Vec::new();
        let mut push = |block: Block, blocks: &mut Vec<Block>| {
            if seen.insert(*block.link()) {
                blocks.push(block);
            }
        };

        let effects = std::iter::once(self.ran_invocation()).chain(self.fork()).chain(self.join());
        for effect in effects {
            if let Effect::Invocation(invocation) = effect {
                for block in invocation.export(&[]) {
                    push(block, &mut blocks);
                }
            }
        }
        for proof in self.proofs() {
            if let Proof::Delegation(delegation) = proof {
                for block in delegation.export(&[]) {
                    push(block, &mut blocks);
                }
            }
        }
        push(self.root.clone(), &mut blocks);
        blocks
    }

    /// Serialize the receipt as a CAR archive rooted at a
    /// `{"ucan-receipt-0.9.1": link}` descriptor.
    ///
    /// # Errors
    ///
    /// Fails when the archive cannot be encoded.
    pub fn archive(&self) -> Result<Vec<u8>> {
        delegation::archive(ARCHIVE_KEY, self.link(), &self.export())
    }

    fn effect(&self, link: Link) -> Effect {
        Invocation::view(&link, Arc::clone(&self.blocks))
            .map_or(Effect::Link(link), Effect::Invocation)
    }
}

impl fmt::Debug for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receipt")
            .field("link", &self.link())
            .field("ran", &self.data.ocm.ran)
            .field("out", &self.data.ocm.out)
            .field("fx", &self.data.ocm.fx)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Receipt {
    fn eq(&self, other: &Self) -> bool {
        self.link() == other.link()
    }
}

/// Extract a receipt from an archive produced by [`Receipt::archive`].
///
/// # Errors
///
/// Fails when the bytes are not a receipt archive.
pub fn extract(bytes: &[u8]) -> Result<Receipt> {
    let (link, blocks) = delegation::unarchive(ARCHIVE_KEY, bytes)?;
    Receipt::view(&link, blocks)
}

/// Build and sign a [`Receipt`].
#[derive(Clone, Debug)]
pub struct ReceiptBuilder {
    ran: Effect,
    out: Outcome<Ipld, Ipld>,
    fork: Vec<Effect>,
    join: Option<Effect>,
    meta: BTreeMap<String, Ipld>,
    proofs: Vec<Proof>,
}

impl ReceiptBuilder {
    /// Returns a new [`ReceiptBuilder`] for the invocation `ran`, with an
    /// empty successful outcome.
    #[must_use]
    pub fn new(ran: impl Into<Effect>) -> Self {
        Self {
            ran: ran.into(),
            out: Outcome::Ok(Ipld::Map(BTreeMap::new())),
            fork: Vec::new(),
            join: None,
            meta: BTreeMap::new(),
            proofs: Vec::new(),
        }
    }

    /// Set the outcome.
    #[must_use]
    pub fn out(mut self, out: Outcome<Ipld, Ipld>) -> Self {
        self.out = out;
        self
    }

    /// Add a forked effect.
    #[must_use]
    pub fn fork(mut self, effect: impl Into<Effect>) -> Self {
        self.fork.push(effect.into());
        self
    }

    /// Set the joined effect.
    #[must_use]
    pub fn join(mut self, effect: impl Into<Effect>) -> Self {
        self.join = Some(effect.into());
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: Ipld) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Add a proof that the issuer may issue receipts for the service.
    #[must_use]
    pub fn proof(mut self, proof: impl Into<Proof>) -> Self {
        self.proofs.push(proof.into());
        self
    }

    /// Sign the receipt with `issuer`.
    ///
    /// # Errors
    ///
    /// Fails when the receipt cannot be encoded.
    pub fn build(self, issuer: &(impl Signer + ?Sized)) -> Result<Receipt> {
        let mut blocks = BlockStore::new();

        let effects = std::iter::once(&self.ran).chain(&self.fork).chain(&self.join);
        for effect in effects {
            if let Effect::Invocation(invocation) = effect {
                blocks.put_all(invocation.export(&[]));
            }
        }
        for proof in &self.proofs {
            if let Proof::Delegation(delegation) = proof {
                blocks.put_all(delegation.export(&[]));
            }
        }

        let ocm = OutcomeModel {
            ran: self.ran.link(),
            out: self.out,
            fx: Effects {
                fork: self.fork.iter().map(Effect::link).collect(),
                join: self.join.as_ref().map(Effect::link),
            },
            meta: self.meta,
            iss: Some(issuer.did()),
            prf: self.proofs.iter().map(Proof::link).collect(),
        };
        let sig = issuer.sign(&Codec::DagCbor.encode(&ocm)?);

        let model = ReceiptModel { ocm, sig };
        let root = Block::encode(&model, Codec::DagCbor)?;
        blocks.put(root.clone());

        Ok(Receipt {
            root,
            data: Arc::new(model),
            blocks: Arc::new(blocks),
        })
    }
}

#[cfg(test)]
mod tests {
    use ipld_core::ipld;

    use super::*;
    use crate::capability::Capability;
    use crate::invocation::InvocationBuilder;
    use crate::outcome::{Failure, Unit};
    use crate::principal::{Signer as _, ed25519};

    fn invocation(service: &ed25519::Signer, can: &str) -> Invocation {
        let alice = ed25519::Signer::generate();
        InvocationBuilder::new()
            .audience(service)
            .capability(Capability::new(can, alice.did().as_str()))
            .build(&alice)
            .expect("should build")
    }

    #[test]
    fn signed_outcome() {
        let service = ed25519::Signer::generate();
        let ran = invocation(&service, "test/attach");

        let receipt = ReceiptBuilder::new(ran.link())
            .out(Outcome::Ok(ipld!({})))
            .meta("retries", ipld!(0))
            .build(&service)
            .expect("should build");

        assert_eq!(receipt.ran(), ran.link());
        assert_eq!(receipt.issuer(), Some(&service.did()));
        assert!(receipt.verify_signature(&*service.verifier()).expect("should encode"));
        assert_eq!(receipt.out_as::<Unit, Failure>().expect("should read"), Outcome::Ok(Unit {}));
        assert_eq!(receipt.ran_invocation(), Effect::Link(ran.link()));

        let other = ed25519::Signer::generate();
        assert!(!receipt.verify_signature(&*other.verifier()).expect("should encode"));
    }

    #[test]
    fn effects_and_archive() {
        let service = ed25519::Signer::generate();
        let ran = invocation(&service, "test/attach");
        let next = invocation(&service, "test/next");
        let forked = invocation(&service, "test/forked");

        let receipt = ReceiptBuilder::new(&ran)
            .fork(&forked)
            .join(&next)
            .build(&service)
            .expect("should build");

        assert_eq!(receipt.fx().fork, vec![forked.link()]);
        assert_eq!(receipt.join(), Some(Effect::Invocation(next.clone())));

        let bytes = receipt.archive().expect("should archive");
        let extracted = extract(&bytes).expect("should extract");
        assert_eq!(extracted.link(), receipt.link());
        assert_eq!(extracted.ran_invocation(), Effect::Invocation(ran));
        assert_eq!(extracted.archive().expect("should archive"), bytes);
    }
}
