//! # Capability
//!
//! A capability names an ability (`can`) on a resource (`with`), optionally
//! constrained by caveats (`nb`).
//!
//! Services describe the capabilities they accept with a typed [`Parser`].
//! The parser checks a capability's caveats deserialize into the service's
//! caveat type and decides whether a claimed capability can be derived from
//! a delegated one.

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::marker::PhantomData;

use ipld_core::ipld::Ipld;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Result, unexpected};

/// Capability caveats.
pub type Caveats = BTreeMap<String, Ipld>;

/// A capability: an ability on a resource, constrained by caveats.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// The ability, e.g. `store/add`.
    pub can: String,

    /// The resource, usually a DID.
    pub with: String,

    /// Caveats restricting the ability.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nb: Caveats,
}

impl Capability {
    /// Create a capability without caveats.
    #[must_use]
    pub fn new(can: impl Into<String>, with: impl Into<String>) -> Self {
        Self {
            can: can.into(),
            with: with.into(),
            nb: Caveats::new(),
        }
    }

    /// Set the capability's caveats from any serializable map-like value.
    ///
    /// # Errors
    ///
    /// Fails when `nb` does not serialize to an IPLD map.
    pub fn caveats(mut self, nb: impl Serialize) -> Result<Self> {
        match ipld_core::serde::to_ipld(nb)? {
            Ipld::Map(map) => self.nb = map,
            Ipld::Null => self.nb = Caveats::new(),
            other => return Err(unexpected!("caveats must be a map, got {other:?}")),
        }
        Ok(self)
    }

    /// Read the capability's caveats as `T`.
    ///
    /// # Errors
    ///
    /// Fails when the caveats do not deserialize into `T`.
    pub fn nb<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(ipld_core::serde::from_ipld(Ipld::Map(self.nb.clone()))?)
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{can: {}, with: {}", self.can, self.with)?;
        if !self.nb.is_empty() {
            write!(f, ", nb: {:?}", self.nb)?;
        }
        f.write_str("}")
    }
}

/// Empty caveats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoCaveats {}

/// Whether the delegated ability `delegated` covers the claimed ability.
///
/// `*` covers every ability and `ns/*` covers every ability in the `ns`
/// namespace.
#[must_use]
pub fn can_match(delegated: &str, claimed: &str) -> bool {
    if delegated == "*" || delegated == claimed {
        return true;
    }
    delegated
        .strip_suffix('*')
        .is_some_and(|prefix| prefix.ends_with('/') && claimed.starts_with(prefix))
}

/// Whether the delegated resource `delegated` covers the claimed resource.
///
/// A delegated resource ending in `*` covers every resource with that
/// prefix.
#[must_use]
pub fn resource_match(delegated: &str, claimed: &str) -> bool {
    delegated.strip_suffix('*').map_or(delegated == claimed, |prefix| claimed.starts_with(prefix))
}

/// The default derivation rule: the claimed resource must be covered by the
/// delegated one, and every delegated caveat must be present and equal in
/// the claim.
///
/// # Errors
///
/// Returns a description of the first violation.
pub fn derives(claimed: &Capability, delegated: &Capability) -> Result<(), String> {
    if !resource_match(&delegated.with, &claimed.with) {
        return Err(format!(
            "resource {} is not contained by delegated resource {}",
            claimed.with, delegated.with
        ));
    }
    for (key, value) in &delegated.nb {
        match claimed.nb.get(key) {
            Some(claimed_value) if claimed_value == value => {}
            Some(claimed_value) => {
                return Err(format!(
                    "caveat {key} violation: {claimed_value:?} does not equal {value:?}"
                ));
            }
            None => return Err(format!("caveat {key} violation: missing from claim")),
        }
    }
    Ok(())
}

/// Why a capability could not be read by a parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadError {
    /// The capability's ability is not the parser's.
    Unknown,

    /// The capability's caveats do not match the parser's caveat type.
    Malformed(String),
}

/// An object-safe capability parser, used where parsers for different
/// caveat types are held together (e.g. the server's handler registry).
pub trait CapabilityParser: Debug + Send + Sync {
    /// The ability this parser reads.
    fn can(&self) -> &str;

    /// Check that `capability` is readable by this parser.
    ///
    /// # Errors
    ///
    /// [`ReadError::Unknown`] when the ability differs, and
    /// [`ReadError::Malformed`] when the caveats do not deserialize.
    fn check(&self, capability: &Capability) -> Result<(), ReadError>;

    /// Check that `claimed` can be derived from `delegated`.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation.
    fn derives(&self, claimed: &Capability, delegated: &Capability) -> Result<(), String>;
}

/// A derivation rule.
pub type DeriveFn = fn(&Capability, &Capability) -> Result<(), String>;

/// A capability read by a [`Parser`], with typed caveats.
#[derive(Clone, Debug, PartialEq)]
pub struct Match<C> {
    /// The ability.
    pub can: String,

    /// The resource.
    pub with: String,

    /// Typed caveats.
    pub nb: C,
}

/// A typed parser for capabilities with caveats of type `C`.
pub struct Parser<C> {
    can: String,
    derives: DeriveFn,
    _caveats: PhantomData<fn() -> C>,
}

impl<C> Clone for Parser<C> {
    fn clone(&self) -> Self {
        Self {
            can: self.can.clone(),
            derives: self.derives,
            _caveats: PhantomData,
        }
    }
}

impl<C> Debug for Parser<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("can", &self.can)
            .field("caveats", &std::any::type_name::<C>())
            .finish()
    }
}

impl<C: DeserializeOwned> Parser<C> {
    /// Create a parser for `can` using the default [`derives`] rule.
    #[must_use]
    pub fn new(can: impl Into<String>) -> Self {
        Self {
            can: can.into(),
            derives,
            _caveats: PhantomData,
        }
    }

    /// Replace the derivation rule.
    #[must_use]
    pub fn with_derives(mut self, derives: DeriveFn) -> Self {
        self.derives = derives;
        self
    }

    /// Read `capability` into a typed [`Match`].
    ///
    /// # Errors
    ///
    /// Fails when the ability differs or the caveats do not deserialize.
    pub fn read(&self, capability: &Capability) -> Result<Match<C>, ReadError> {
        if capability.can != self.can {
            return Err(ReadError::Unknown);
        }
        let nb = capability.nb::<C>().map_err(|e| ReadError::Malformed(e.to_string()))?;
        Ok(Match {
            can: capability.can.clone(),
            with: capability.with.clone(),
            nb,
        })
    }
}

impl<C: DeserializeOwned> CapabilityParser for Parser<C> {
    fn can(&self) -> &str {
        &self.can
    }

    fn check(&self, capability: &Capability) -> Result<(), ReadError> {
        self.read(capability).map(|_| ())
    }

    fn derives(&self, claimed: &Capability, delegated: &Capability) -> Result<(), String> {
        (self.derives)(claimed, delegated)
    }
}
