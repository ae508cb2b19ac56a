//! # Delegation
//!
//! A delegation is a signed UCAN granting capabilities from its issuer to its
//! audience. It is materialized as a view over a block store: the root block
//! holding the token, plus whichever proof blocks the store contains. Proofs
//! missing from the store are link-only and left for the validator to
//! resolve.
//!
//! Delegations are created with [`DelegationBuilder`]:
//!
//! ```rust,ignore
//! let delegation = DelegationBuilder::new()
//!     .audience(&bob)
//!     .capability(Capability::new("store/add", alice.did()))
//!     .build(&alice)?;
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::capability::Capability;
use crate::principal::{Did, Principal, Signer};
use crate::signature::Signature;
use crate::store::{Block, BlockStore, Codec, car};
use crate::ucan::{Fact, Payload, UcanModel};
use crate::{Error, Link, Result, unexpected};

/// Default lifetime, in seconds, of a delegation with no explicit
/// expiration.
pub const DEFAULT_EXPIRATION: i64 = 30;

/// Archive descriptor key for delegations.
pub const ARCHIVE_KEY: &str = "ucan-0.9.1";

/// A delegation, materialized over a block store.
#[derive(Clone)]
pub struct Delegation {
    root: Block,
    data: Arc<UcanModel>,
    blocks: Arc<BlockStore>,
}

impl Delegation {
    /// Create a view of the delegation rooted at `root` over `blocks`.
    ///
    /// # Errors
    ///
    /// Fails when `root` is not in `blocks` or does not decode to a UCAN.
    pub fn view(root: &Link, blocks: impl Into<Arc<BlockStore>>) -> Result<Self> {
        let blocks = blocks.into();
        let Some(block) = blocks.get(root) else {
            return Err(unexpected!("missing delegation block {root}"));
        };
        let data = block.decode::<UcanModel>()?;
        Ok(Self {
            root: block.clone(),
            data: Arc::new(data),
            blocks,
        })
    }

    /// The delegation's link.
    #[must_use]
    pub const fn link(&self) -> Link {
        *self.root.link()
    }

    /// The root block.
    #[must_use]
    pub const fn root(&self) -> &Block {
        &self.root
    }

    /// The decoded token.
    #[must_use]
    pub fn data(&self) -> &UcanModel {
        &self.data
    }

    /// UCAN version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.data.v
    }

    /// The issuer's DID.
    #[must_use]
    pub fn issuer(&self) -> &Did {
        &self.data.iss
    }

    /// The audience's DID.
    #[must_use]
    pub fn audience(&self) -> &Did {
        &self.data.aud
    }

    /// Delegated capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.data.att
    }

    /// Expiration, in seconds since the Unix epoch. `None` never expires.
    #[must_use]
    pub fn expiration(&self) -> Option<i64> {
        self.data.exp
    }

    /// Not before, in seconds since the Unix epoch.
    #[must_use]
    pub fn not_before(&self) -> Option<i64> {
        self.data.nbf
    }

    /// Nonce.
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.data.nnc.as_deref()
    }

    /// Facts.
    #[must_use]
    pub fn facts(&self) -> &[Fact] {
        &self.data.fct
    }

    /// The signature.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.data.s
    }

    /// Links to the delegation's proofs.
    #[must_use]
    pub fn proof_links(&self) -> &[Link] {
        &self.data.prf
    }

    /// The delegation's proofs. Proofs whose blocks are in the store are
    /// materialized, the rest are link-only.
    #[must_use]
    pub fn proofs(&self) -> Vec<Proof> {
        self.data
            .prf
            .iter()
            .map(|link| {
                Self::view(link, Arc::clone(&self.blocks))
                    .map_or(Proof::Link(*link), Proof::Delegation)
            })
            .collect()
    }

    /// Every block in the underlying store.
    #[must_use]
    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    /// Export the delegation's proof blocks followed by its root block.
    /// Proofs listed in `omit`, and blocks reachable only through them, are
    /// skipped.
    #[must_use]
    pub fn export(&self, omit: &[Link]) -> Vec<Block> {
        let mut seen = HashSet::new();
        let mut blocks = Vec::new();
        self.export_into(omit, &mut seen, &mut blocks);
        blocks
    }

    fn export_into(&self, omit: &[Link], seen: &mut HashSet<Link>, blocks: &mut Vec<Block>) {
        for proof in self.proofs() {
            if let Proof::Delegation(proof) = proof {
                if !omit.contains(&proof.link()) {
                    proof.export_into(omit, seen, blocks);
                }
            }
        }
        if seen.insert(self.link()) {
            blocks.push(self.root.clone());
        }
    }

    /// Whether the delegation has expired at `now` (seconds since the Unix
    /// epoch).
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.data.exp.is_some_and(|exp| exp <= now)
    }

    /// Whether the delegation has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    /// Whether the delegation is not yet valid at `now` (seconds since the
    /// Unix epoch).
    #[must_use]
    pub fn is_too_early_at(&self, now: i64) -> bool {
        self.data.nbf.is_some_and(|nbf| nbf > now)
    }

    /// Whether the delegation is not yet valid.
    #[must_use]
    pub fn is_too_early(&self) -> bool {
        self.is_too_early_at(chrono::Utc::now().timestamp())
    }

    /// Serialize the delegation as a CAR archive: the exported blocks
    /// followed by a `{"ucan-0.9.1": link}` descriptor, which is the CAR's
    /// root.
    ///
    /// # Errors
    ///
    /// Fails when the archive cannot be encoded.
    pub fn archive(&self) -> Result<Vec<u8>> {
        archive(ARCHIVE_KEY, self.link(), &self.export(&[]))
    }
}

impl fmt::Debug for Delegation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegation")
            .field("link", &self.link())
            .field("iss", &self.data.iss)
            .field("aud", &self.data.aud)
            .field("att", &self.data.att)
            .field("prf", &self.data.prf)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Delegation {
    fn eq(&self, other: &Self) -> bool {
        self.link() == other.link()
    }
}

/// Extract a delegation from an archive produced by
/// [`Delegation::archive`].
///
/// # Errors
///
/// Fails when the bytes are not a delegation archive.
pub fn extract(bytes: &[u8]) -> Result<Delegation> {
    let (link, blocks) = unarchive(ARCHIVE_KEY, bytes)?;
    Delegation::view(&link, blocks)
}

/// Format a delegation as a multibase base64 string of its archive.
///
/// # Errors
///
/// Fails when the archive cannot be encoded.
pub fn format(delegation: &Delegation) -> Result<String> {
    Ok(multibase::encode(multibase::Base::Base64, delegation.archive()?))
}

/// Parse a delegation formatted with [`format`].
///
/// # Errors
///
/// Fails when the string is not a multibase-encoded delegation archive.
pub fn parse(formatted: &str) -> Result<Delegation> {
    let (_, bytes) = multibase::decode(formatted)?;
    extract(&bytes)
}

pub(crate) fn archive(key: &str, link: Link, blocks: &[Block]) -> Result<Vec<u8>> {
    let descriptor = Block::encode(&BTreeMap::from([(key, link)]), Codec::DagCbor)?;
    car::encode(&[*descriptor.link()], blocks.iter().chain(std::iter::once(&descriptor)))
}

pub(crate) fn unarchive(key: &str, bytes: &[u8]) -> Result<(Link, BlockStore)> {
    let (roots, blocks) = car::decode(bytes)?;
    let [root] = roots.as_slice() else {
        return Err(Error::Codec(format!("archive must have one root, found {}", roots.len())));
    };
    let Some(block) = blocks.get(root) else {
        return Err(Error::Codec("archive descriptor block is missing".into()));
    };
    let descriptor: BTreeMap<String, Link> = block.decode()?;
    let Some(link) = descriptor.get(key).copied() else {
        return Err(Error::Codec(format!("archive descriptor has no {key} entry")));
    };

    let root = *root;
    let blocks = blocks.into_iter().filter(|b| *b.link() != root).collect();
    Ok((link, blocks))
}

/// A proof: a materialized delegation or a link to one.
#[derive(Clone, Debug, PartialEq)]
pub enum Proof {
    /// A delegation whose blocks are available.
    Delegation(Delegation),

    /// A delegation known only by its link.
    Link(Link),
}

impl Proof {
    /// The proof's link.
    #[must_use]
    pub const fn link(&self) -> Link {
        match self {
            Self::Delegation(delegation) => delegation.link(),
            Self::Link(link) => *link,
        }
    }
}

impl From<Delegation> for Proof {
    fn from(delegation: Delegation) -> Self {
        Self::Delegation(delegation)
    }
}

impl From<&Delegation> for Proof {
    fn from(delegation: &Delegation) -> Self {
        Self::Delegation(delegation.clone())
    }
}

impl From<Link> for Proof {
    fn from(link: Link) -> Self {
        Self::Link(link)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Expiration {
    #[default]
    Default,
    At(i64),
    Never,
}

/// Build and sign a [`Delegation`].
#[derive(Clone, Debug)]
pub struct DelegationBuilder {
    audience: Option<Did>,
    capabilities: Vec<Capability>,
    expiration: Expiration,
    lifetime: i64,
    not_before: Option<i64>,
    nonce: Option<String>,
    facts: Vec<Fact>,
    proofs: Vec<Proof>,
}

impl Default for DelegationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DelegationBuilder {
    /// Returns a new [`DelegationBuilder`]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            audience: None,
            capabilities: Vec::new(),
            expiration: Expiration::Default,
            lifetime: DEFAULT_EXPIRATION,
            not_before: None,
            nonce: None,
            facts: Vec::new(),
            proofs: Vec::new(),
        }
    }

    /// Specify the principal the capabilities are delegated to.
    #[must_use]
    pub fn audience(mut self, audience: &(impl Principal + ?Sized)) -> Self {
        self.audience = Some(audience.did());
        self
    }

    /// Add a capability to delegate.
    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Add several capabilities to delegate.
    #[must_use]
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    /// Set an explicit expiration, in seconds since the Unix epoch.
    #[must_use]
    pub const fn expiration(mut self, expiration: i64) -> Self {
        self.expiration = Expiration::At(expiration);
        self
    }

    /// The delegation never expires.
    #[must_use]
    pub const fn no_expiration(mut self) -> Self {
        self.expiration = Expiration::Never;
        self
    }

    /// Set the lifetime, in seconds, used when no explicit expiration is
    /// given. Defaults to [`DEFAULT_EXPIRATION`].
    #[must_use]
    pub const fn lifetime(mut self, seconds: i64) -> Self {
        self.lifetime = seconds;
        self
    }

    /// Set the time, in seconds since the Unix epoch, before which the
    /// delegation is not valid.
    #[must_use]
    pub const fn not_before(mut self, not_before: i64) -> Self {
        self.not_before = Some(not_before);
        self
    }

    /// Set a nonce.
    #[must_use]
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Add a fact.
    #[must_use]
    pub fn fact(mut self, fact: Fact) -> Self {
        self.facts.push(fact);
        self
    }

    /// Add a proof. Proofs given as links are carried by link only.
    #[must_use]
    pub fn proof(mut self, proof: impl Into<Proof>) -> Self {
        self.proofs.push(proof.into());
        self
    }

    /// Add several proofs.
    #[must_use]
    pub fn proofs<P: Into<Proof>>(mut self, proofs: impl IntoIterator<Item = P>) -> Self {
        self.proofs.extend(proofs.into_iter().map(Into::into));
        self
    }

    /// Sign the delegation with `issuer`.
    ///
    /// # Errors
    ///
    /// Fails when no audience was set or the token cannot be encoded.
    pub fn build(self, issuer: &(impl Signer + ?Sized)) -> Result<Delegation> {
        let Some(audience) = self.audience else {
            return Err(unexpected!("audience is required"));
        };

        let mut blocks = BlockStore::new();
        let mut links = Vec::with_capacity(self.proofs.len());
        for proof in &self.proofs {
            links.push(proof.link());
            if let Proof::Delegation(delegation) = proof {
                blocks.put_all(delegation.export(&[]));
            }
        }

        let expiration = match self.expiration {
            Expiration::Default => Some(chrono::Utc::now().timestamp() + self.lifetime),
            Expiration::At(at) => Some(at),
            Expiration::Never => None,
        };

        let model = Payload {
            audience,
            capabilities: self.capabilities,
            expiration,
            not_before: self.not_before,
            nonce: self.nonce,
            facts: self.facts,
            proofs: links,
        }
        .sign(issuer)?;

        let root = Block::encode(&model, Codec::DagCbor)?;
        blocks.put(root.clone());

        Ok(Delegation {
            root,
            data: Arc::new(model),
            blocks: Arc::new(blocks),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::ed25519;

    fn chain() -> (Delegation, Delegation) {
        let alice = ed25519::Signer::generate();
        let bob = ed25519::Signer::generate();
        let carol = ed25519::Signer::generate();

        let first = DelegationBuilder::new()
            .audience(&bob)
            .capability(Capability::new("store/add", alice.did().as_str()))
            .build(&alice)
            .expect("should build");
        let second = DelegationBuilder::new()
            .audience(&carol)
            .capability(Capability::new("store/add", alice.did().as_str()))
            .proof(&first)
            .build(&bob)
            .expect("should build");
        (first, second)
    }

    #[test]
    fn default_expiration() {
        let (first, _) = chain();
        let now = chrono::Utc::now().timestamp();
        let exp = first.expiration().expect("should expire");
        assert!(exp > now && exp <= now + DEFAULT_EXPIRATION);
    }

    #[test]
    fn last_setter_wins() {
        let alice = ed25519::Signer::generate();
        let never = DelegationBuilder::new()
            .audience(&alice)
            .expiration(10)
            .no_expiration()
            .build(&alice)
            .expect("should build");
        assert_eq!(never.expiration(), None);

        let at = DelegationBuilder::new()
            .audience(&alice)
            .no_expiration()
            .expiration(10)
            .build(&alice)
            .expect("should build");
        assert_eq!(at.expiration(), Some(10));
        assert!(at.is_expired());
    }

    #[test]
    fn export_order() {
        let (first, second) = chain();
        let links: Vec<_> = second.export(&[]).iter().map(|b| *b.link()).collect();
        assert_eq!(links, vec![first.link(), second.link()]);

        let omitted: Vec<_> = second.export(&[first.link()]).iter().map(|b| *b.link()).collect();
        assert_eq!(omitted, vec![second.link()]);
    }

    #[test]
    fn proofs_materialized() {
        let (first, second) = chain();
        let proofs = second.proofs();
        assert_eq!(proofs, vec![Proof::Delegation(first.clone())]);

        let blocks: BlockStore = second.export(&[first.link()]).into_iter().collect();
        let partial = Delegation::view(&second.link(), blocks).expect("should view");
        assert_eq!(partial.proofs(), vec![Proof::Link(first.link())]);
    }

    #[test]
    fn archive_round_trip() {
        let (_, second) = chain();
        let bytes = second.archive().expect("should archive");
        let extracted = extract(&bytes).expect("should extract");
        assert_eq!(extracted.link(), second.link());
        assert_eq!(extracted.archive().expect("should archive"), bytes);

        let formatted = format(&second).expect("should format");
        assert_eq!(parse(&formatted).expect("should parse").link(), second.link());
    }
}
