//! Error types for the courier engine.
//!
//! The taxonomy separates configuration errors, which are raised eagerly
//! while wiring routes, from processing failures, which travel on the
//! exchange and surface through the completion contract.

use crate::exchange::Failure;
use thiserror::Error;
use uuid::Uuid;

/// The main error type for courier operations.
#[derive(Debug, Error)]
pub enum CourierError {
    /// A configuration error raised at setup time.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A processing failure surfaced to a synchronous caller.
    #[error("{0}")]
    Processing(#[from] ProcessingError),

    /// An invalid mutation of an exchange.
    #[error("{0}")]
    Exchange(#[from] ExchangeError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building engine configuration.
///
/// These are never raised at exchange-processing time; invalid wiring is
/// rejected before any exchange flows.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Two policies in the same scope claim the same failure kind.
    #[error("ambiguous exception policy: kind `{kind}` is claimed by more than one policy in scope `{scope}`")]
    AmbiguousPolicy {
        /// The doubly-claimed failure kind.
        kind: String,
        /// The scope in which the collision was found.
        scope: String,
    },

    /// A redelivery policy fails validation.
    #[error("invalid redelivery policy: {0}")]
    InvalidRedeliveryPolicy(String),

    /// A resequencer configuration fails validation.
    #[error("invalid resequencer configuration: {0}")]
    InvalidResequencer(String),
}

/// The failure a synchronous caller observes when an exchange ends up
/// failed: the root cause plus how many redeliveries were attempted.
#[derive(Debug, Clone, Error)]
#[error("exchange {exchange_id} failed after {redelivery_count} redeliveries: {failure}")]
pub struct ProcessingError {
    /// Id of the failed exchange.
    pub exchange_id: Uuid,
    /// The final failure cause.
    pub failure: Failure,
    /// How many redelivery attempts were made.
    pub redelivery_count: u32,
}

/// Errors raised by invalid exchange mutation.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// The exchange is terminally failed with an unhandled failure; all
    /// further mutation is rejected.
    #[error("exchange is terminally failed; mutation rejected")]
    TerminallyFailed,
}
