//! The exchange: the unit of work threaded through every component.
//!
//! An exchange is conceptually owned by one step at a time, but the
//! physical object may cross threads at asynchronous completion
//! boundaries. [`ExchangeRef`] wraps it in a mutex whose acquisition at
//! those boundaries doubles as the required memory-visibility barrier.

pub mod failure;
pub mod message;

pub use failure::{kinds, Failure, FailureKind};
pub use message::{Headers, Message};

use crate::errors::ExchangeError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Engine-internal property: redelivery attempts made so far.
pub const REDELIVERY_COUNTER: &str = "courier.redelivery-counter";
/// Engine-internal property: set once the exchange has been redelivered.
pub const REDELIVERED: &str = "courier.redelivered";
/// Engine-internal property: the comparator-derived sequence key.
pub const SEQUENCE_KEY: &str = "courier.sequence-key";
/// Engine-internal property: why the exchange was cancelled.
pub const CANCEL_REASON: &str = "courier.cancel-reason";
/// Engine-internal property: the failure caught by a handling policy.
pub const CAUGHT_FAILURE: &str = "courier.caught-failure";

const ENGINE_PREFIX: &str = "courier.";

/// Message exchange pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExchangePattern {
    /// Fire-and-forget; only the input message is meaningful.
    #[default]
    OneWay,
    /// The caller expects an output message.
    RequestReply,
}

/// Completion state of an exchange. Terminal once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExchangeStatus {
    /// Still being processed.
    #[default]
    InFlight,
    /// Completed successfully.
    Completed,
    /// Completed with a failure.
    Failed,
}

/// Shared handle to an exchange crossing step and thread boundaries.
pub type ExchangeRef = Arc<Mutex<Exchange>>;

/// The unit of work.
#[derive(Debug)]
pub struct Exchange {
    id: Uuid,
    created_at: DateTime<Utc>,
    pattern: ExchangePattern,
    input: Message,
    output: Option<Message>,
    properties: HashMap<String, Value>,
    failure: Option<Failure>,
    status: ExchangeStatus,
    cancelled: bool,
}

impl Exchange {
    /// Creates a fresh in-flight exchange.
    #[must_use]
    pub fn new(pattern: ExchangePattern) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            pattern,
            input: Message::new(),
            output: None,
            properties: HashMap::new(),
            failure: None,
            status: ExchangeStatus::InFlight,
            cancelled: false,
        }
    }

    /// Creates a one-way exchange with the given input body.
    #[must_use]
    pub fn one_way(body: Value) -> Self {
        let mut exchange = Self::new(ExchangePattern::OneWay);
        exchange.input.set_body(body);
        exchange
    }

    /// Creates a request-reply exchange with the given input body.
    #[must_use]
    pub fn request_reply(body: Value) -> Self {
        let mut exchange = Self::new(ExchangePattern::RequestReply);
        exchange.input.set_body(body);
        exchange
    }

    /// Wraps this exchange in a shared handle.
    #[must_use]
    pub fn into_ref(self) -> ExchangeRef {
        Arc::new(Mutex::new(self))
    }

    /// The process-unique, immutable exchange id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the exchange was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The message exchange pattern.
    #[must_use]
    pub fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    /// Current completion state.
    #[must_use]
    pub fn status(&self) -> ExchangeStatus {
        self.status
    }

    /// The input message.
    #[must_use]
    pub fn input(&self) -> &Message {
        &self.input
    }

    /// Mutable access to the input message.
    pub fn input_mut(&mut self) -> Result<&mut Message, ExchangeError> {
        self.ensure_mutable()?;
        Ok(&mut self.input)
    }

    /// The output message, if one has been produced.
    #[must_use]
    pub fn output(&self) -> Option<&Message> {
        self.output.as_ref()
    }

    /// Mutable access to the output message, created on first use.
    pub fn output_mut(&mut self) -> Result<&mut Message, ExchangeError> {
        self.ensure_mutable()?;
        Ok(self.output.get_or_insert_with(Message::new))
    }

    /// Reads an exchange-scoped property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Sets an exchange-scoped property.
    pub fn set_property(
        &mut self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), ExchangeError> {
        self.ensure_mutable()?;
        self.properties.insert(key.into(), value);
        Ok(())
    }

    /// Removes a property, returning its value.
    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    /// The captured failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Returns true if the failure slot is set.
    #[must_use]
    pub fn has_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Captures a failure. Overwrites a previously captured one.
    pub fn set_failure(&mut self, failure: Failure) {
        self.failure = Some(failure);
    }

    /// Clears the failure slot, returning the captured failure.
    pub fn clear_failure(&mut self) -> Option<Failure> {
        self.failure.take()
    }

    /// Marks the exchange terminally completed. No-op once terminal.
    pub fn mark_completed(&mut self) {
        if self.status == ExchangeStatus::InFlight {
            self.status = ExchangeStatus::Completed;
        }
    }

    /// Marks the exchange terminally failed. No-op once terminal.
    pub fn mark_failed(&mut self) {
        if self.status == ExchangeStatus::InFlight {
            self.status = ExchangeStatus::Failed;
        }
    }

    /// Requests cooperative cancellation; honored between steps.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.cancelled = true;
        self.properties
            .insert(CANCEL_REASON.to_string(), Value::String(reason.into()));
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Redelivery attempts made so far.
    #[must_use]
    pub fn redelivery_count(&self) -> u32 {
        self.properties
            .get(REDELIVERY_COUNTER)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Increments the redelivery counter, returning the new count.
    pub fn increment_redelivery_count(&mut self) -> u32 {
        let next = self.redelivery_count() + 1;
        self.properties
            .insert(REDELIVERY_COUNTER.to_string(), Value::from(next));
        self.properties.insert(REDELIVERED.to_string(), Value::Bool(true));
        next
    }

    /// Clears redelivery bookkeeping after a successful attempt run.
    pub fn clear_redelivery_state(&mut self) {
        self.properties.remove(REDELIVERY_COUNTER);
        self.properties.remove(REDELIVERED);
    }

    /// Clones this exchange for an independent concurrent branch: fresh
    /// id, copied messages and user properties. Engine bookkeeping, the
    /// failure slot, and completion state do not carry over.
    #[must_use]
    pub fn branch_clone(&self) -> Self {
        let properties = self
            .properties
            .iter()
            .filter(|(k, _)| !k.starts_with(ENGINE_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            pattern: self.pattern,
            input: self.input.clone(),
            output: self.output.clone(),
            properties,
            failure: None,
            status: ExchangeStatus::InFlight,
            cancelled: false,
        }
    }

    fn ensure_mutable(&self) -> Result<(), ExchangeError> {
        if self.status == ExchangeStatus::Failed && self.failure.is_some() {
            return Err(ExchangeError::TerminallyFailed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_fresh_exchange() {
        let exchange = Exchange::one_way(json!("hello"));
        assert_eq!(exchange.pattern(), ExchangePattern::OneWay);
        assert_eq!(exchange.status(), ExchangeStatus::InFlight);
        assert_eq!(exchange.input().body(), &json!("hello"));
        assert!(exchange.output().is_none());
        assert!(!exchange.has_failure());
        assert_eq!(exchange.redelivery_count(), 0);
    }

    #[test]
    fn test_unique_ids() {
        let a = Exchange::new(ExchangePattern::OneWay);
        let b = Exchange::new(ExchangePattern::OneWay);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_output_created_on_first_use() {
        let mut exchange = Exchange::request_reply(json!(1));
        exchange
            .output_mut()
            .expect("in-flight exchange is mutable")
            .set_body(json!("reply"));
        assert_eq!(exchange.output().map(Message::body), Some(&json!("reply")));
    }

    #[test]
    fn test_terminal_failed_rejects_mutation() {
        let mut exchange = Exchange::one_way(json!(1));
        exchange.set_failure(Failure::new(FailureKind::new("io"), "boom"));
        exchange.mark_failed();

        assert!(exchange.set_property("k", json!(1)).is_err());
        assert!(exchange.input_mut().is_err());
    }

    #[test]
    fn test_terminal_once_set() {
        let mut exchange = Exchange::one_way(json!(1));
        exchange.mark_completed();
        exchange.mark_failed();
        assert_eq!(exchange.status(), ExchangeStatus::Completed);
    }

    #[test]
    fn test_handled_failure_restores_mutability() {
        let mut exchange = Exchange::one_way(json!(1));
        exchange.set_failure(Failure::new(FailureKind::new("io"), "boom"));
        assert!(exchange.set_property("k", json!(1)).is_ok());

        let caught = exchange.clear_failure();
        assert!(caught.is_some());
        assert!(!exchange.has_failure());
    }

    #[test]
    fn test_redelivery_counter() {
        let mut exchange = Exchange::one_way(json!(1));
        assert_eq!(exchange.increment_redelivery_count(), 1);
        assert_eq!(exchange.increment_redelivery_count(), 2);
        assert_eq!(exchange.redelivery_count(), 2);
        assert_eq!(exchange.property(REDELIVERED), Some(&json!(true)));

        exchange.clear_redelivery_state();
        assert_eq!(exchange.redelivery_count(), 0);
    }

    #[test]
    fn test_branch_clone_strips_engine_state() {
        let mut exchange = Exchange::one_way(json!("body"));
        exchange
            .set_property("user-key", json!("kept"))
            .expect("mutable");
        exchange.increment_redelivery_count();
        exchange.set_failure(Failure::new(FailureKind::new("io"), "boom"));

        let branch = exchange.branch_clone();
        assert_ne!(branch.id(), exchange.id());
        assert_eq!(branch.input().body(), &json!("body"));
        assert_eq!(branch.property("user-key"), Some(&json!("kept")));
        assert_eq!(branch.redelivery_count(), 0);
        assert!(!branch.has_failure());
        assert_eq!(branch.status(), ExchangeStatus::InFlight);
    }

    #[test]
    fn test_cancellation_flag() {
        let mut exchange = Exchange::one_way(json!(1));
        assert!(!exchange.is_cancelled());
        exchange.cancel("shutting down");
        assert!(exchange.is_cancelled());
        assert_eq!(
            exchange.property(CANCEL_REASON),
            Some(&json!("shutting down"))
        );
    }
}
