//! Failure classification.
//!
//! Failures are classified by a [`FailureKind`]: a dotted hierarchical path
//! of type identifiers where every prefix is an explicit supertype. The
//! hierarchy is a closed, ahead-of-time table — matching is a prefix walk,
//! not a runtime type query.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Engine-reserved failure kinds.
pub mod kinds {
    /// Cooperative cancellation of an in-flight exchange.
    pub const CANCELLED: &str = "courier.cancelled";
    /// A panic escaping a processor, caught and converted.
    pub const PANIC: &str = "courier.panic";
    /// The engine itself rejected an exchange mutation.
    pub const EXCHANGE: &str = "courier.exchange";
    /// A synchronous wait timed out before completion.
    pub const TIMEOUT: &str = "courier.timeout";
}

/// A hierarchical failure classification, e.g. `io.file-not-found`.
///
/// A kind is a supertype of every kind it prefixes: `io` matches
/// `io.file-not-found`, and an exact match is the most specific match
/// possible. Specificity is the number of matched path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureKind(String);

impl FailureKind {
    /// Creates a kind from a dotted path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the dotted path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of path segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.split('.').count()
    }

    /// Returns true if `self` is `other` or a descendant of it.
    #[must_use]
    pub fn is_a(&self, other: &FailureKind) -> bool {
        self.0 == other.0
            || (self.0.len() > other.0.len()
                && self.0.starts_with(other.0.as_str())
                && self.0.as_bytes()[other.0.len()] == b'.')
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FailureKind {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// A captured failure: classification, message, and optional root cause.
///
/// Stored in the exchange's failure slot; cleared when an exception policy
/// handles or continues past it.
#[derive(Debug, Clone, Error)]
#[error("[{kind}] {message}")]
pub struct Failure {
    /// The failure classification.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
    cause: Option<Arc<anyhow::Error>>,
}

impl Failure {
    /// Creates a failure with the given kind and message.
    #[must_use]
    pub fn new(kind: impl Into<FailureKind>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Creates a cancellation failure.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::new(kinds::CANCELLED), reason)
    }

    /// Creates a failure from a caught panic payload.
    #[must_use]
    pub fn from_panic(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::new(kinds::PANIC), detail)
    }

    /// Returns the underlying cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_deref()
    }

    /// Returns true if this failure represents cooperative cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.kind.as_str() == kinds::CANCELLED
    }
}

impl From<crate::errors::ExchangeError> for Failure {
    fn from(err: crate::errors::ExchangeError) -> Self {
        Self::new(FailureKind::new(kinds::EXCHANGE), err.to_string())
    }
}
