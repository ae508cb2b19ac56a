//! # Outcome
//!
//! The result of running an invocation. On the wire an outcome is a keyed
//! union: `{"ok": value}` or `{"error": value}`.

use std::fmt;

use ipld_core::ipld::Ipld;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An invocation outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome<T, E = Failure> {
    /// The invocation succeeded.
    #[serde(rename = "ok")]
    Ok(T),

    /// The invocation failed.
    #[serde(rename = "error")]
    Error(E),
}

impl<T, E> Outcome<T, E> {
    /// Whether the outcome is a success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Whether the outcome is a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The success value, if any.
    #[must_use]
    pub const fn ok(&self) -> Option<&T> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Error(_) => None,
        }
    }

    /// The failure value, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&E> {
        match self {
            Self::Ok(_) => None,
            Self::Error(error) => Some(error),
        }
    }

    /// Map the success value.
    pub fn map_ok<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U, E> {
        match self {
            Self::Ok(value) => Outcome::Ok(f(value)),
            Self::Error(error) => Outcome::Error(error),
        }
    }

    /// Map the failure value.
    pub fn map_error<F>(self, f: impl FnOnce(E) -> F) -> Outcome<T, F> {
        match self {
            Self::Ok(value) => Outcome::Ok(value),
            Self::Error(error) => Outcome::Error(f(error)),
        }
    }

    /// Chain an operation on success.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U, E>) -> Outcome<U, E> {
        match self {
            Self::Ok(value) => f(value),
            Self::Error(error) => Outcome::Error(error),
        }
    }

    /// Chain an operation on failure.
    pub fn or_else<F>(self, f: impl FnOnce(E) -> Outcome<T, F>) -> Outcome<T, F> {
        match self {
            Self::Ok(value) => Outcome::Ok(value),
            Self::Error(error) => f(error),
        }
    }

    /// Convert into a standard [`Result`].
    ///
    /// # Errors
    ///
    /// Returns the failure value when the outcome is a failure.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Error(error) => Err(error),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(error) => Self::Error(error),
        }
    }
}

impl Outcome<Ipld, Ipld> {
    /// Convert an outcome into its IPLD form.
    ///
    /// # Errors
    ///
    /// Fails when either value cannot be represented as IPLD.
    pub fn from_typed<T: Serialize, E: Serialize>(outcome: Outcome<T, E>) -> Result<Self> {
        Ok(match outcome {
            Outcome::Ok(value) => Self::Ok(ipld_core::serde::to_ipld(value)?),
            Outcome::Error(error) => Self::Error(ipld_core::serde::to_ipld(error)?),
        })
    }

    /// Read the outcome's values as typed values.
    ///
    /// # Errors
    ///
    /// Fails when the value does not deserialize into `T` (or `E`).
    pub fn to_typed<T: DeserializeOwned, E: DeserializeOwned>(&self) -> Result<Outcome<T, E>> {
        Ok(match self {
            Self::Ok(value) => Outcome::Ok(ipld_core::serde::from_ipld(value.clone())?),
            Self::Error(error) => Outcome::Error(ipld_core::serde::from_ipld(error.clone())?),
        })
    }
}

/// The empty success value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {}

/// A wire-serializable error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Stable error name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Error description.
    pub message: String,

    /// Optional stack trace or cause chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl Failure {
    /// Create an unnamed failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
            stack: None,
        }
    }

    /// Create a named failure.
    #[must_use]
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            message: message.into(),
            stack: None,
        }
    }

    /// Attach a stack or cause chain.
    #[must_use]
    pub fn stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Failure {}

impl From<&Error> for Failure {
    fn from(error: &Error) -> Self {
        Self::named(error.name(), error.to_string())
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self::from(&error)
    }
}
