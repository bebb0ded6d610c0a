//! Failure interception, policy resolution, and redelivery.
//!
//! [`ErrorHandler`] wraps a processor and watches its failure slot. When
//! an attempt ends with a captured failure, the handler resolves the
//! governing [`ExceptionPolicy`], redelivers with the policy's backoff
//! until retries run out, and then applies the policy's handled or
//! continued decision. Cancellation failures bypass resolution entirely.
//!
//! Redelivery re-runs the wrapped processor through the executor's
//! trampoline, so long retry chains never grow the native stack.

pub mod policy;
pub mod redelivery;

pub use policy::{
    ErrorPolicyRegistry, ErrorPolicyRegistryBuilder, ExceptionPolicy, PolicyDecision, Predicate,
};
pub use redelivery::{RedeliveryPolicy, RetryLogLevel};

use crate::events::{default_sink, EventSink};
use crate::exchange::{ExchangeRef, Failure, CAUGHT_FAILURE};
use crate::processor::callback::SyncHandshake;
use crate::processor::{AsyncCallback, AsyncProcessor};
use crate::reactive::{panic_message, ReactiveExecutor, Task};
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a processor with failure interception and redelivery.
pub struct ErrorHandler {
    name: String,
    inner: Arc<dyn AsyncProcessor>,
    registry: Arc<ErrorPolicyRegistry>,
    executor: Arc<ReactiveExecutor>,
    events: Arc<dyn EventSink>,
}

impl ErrorHandler {
    /// Creates an error handler around `inner`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        inner: Arc<dyn AsyncProcessor>,
        registry: Arc<ErrorPolicyRegistry>,
        executor: Arc<ReactiveExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            inner,
            registry,
            executor,
            events: default_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the handler name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AsyncProcessor for ErrorHandler {
    fn process(&self, exchange: &ExchangeRef, callback: AsyncCallback) -> bool {
        let state = Arc::new(RetryState {
            name: self.name.clone(),
            inner: Arc::clone(&self.inner),
            registry: Arc::clone(&self.registry),
            executor: Arc::clone(&self.executor),
            events: Arc::clone(&self.events),
            exchange: exchange.clone(),
            callback,
            handshake: SyncHandshake::new(),
        });

        let driver = Arc::clone(&state);
        self.executor
            .schedule_main(Task::new("errorhandler::attempt", move || {
                driver.run_attempt();
            }));

        state.handshake.note_returned()
    }
}

enum Outcome {
    Finish,
    Retry {
        delay: Duration,
        asynchronous: bool,
    },
}

struct RetryState {
    name: String,
    inner: Arc<dyn AsyncProcessor>,
    registry: Arc<ErrorPolicyRegistry>,
    executor: Arc<ReactiveExecutor>,
    events: Arc<dyn EventSink>,
    exchange: ExchangeRef,
    callback: AsyncCallback,
    handshake: SyncHandshake,
}

impl RetryState {
    /// Runs one attempt of the wrapped processor.
    fn run_attempt(self: Arc<Self>) {
        let resume = Arc::clone(&self);
        let attempt_callback = AsyncCallback::new(move |done_sync| {
            if !done_sync {
                let driver = Arc::clone(&resume);
                resume
                    .executor
                    .schedule_main(Task::new("errorhandler::resume", move || {
                        driver.on_attempt_complete();
                    }));
            }
        });

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.inner.process(&self.exchange, attempt_callback.clone())
        }));
        let done_sync = match outcome {
            Ok(done_sync) => done_sync,
            Err(panic) => {
                let detail = panic_message(&panic);
                tracing::error!(
                    handler = %self.name,
                    detail = %detail,
                    "wrapped processor panicked"
                );
                if attempt_callback.has_fired() {
                    // The attempt completed before panicking; trust the
                    // continuation path.
                    return;
                }
                self.exchange.lock().set_failure(Failure::from_panic(detail));
                true
            }
        };

        if done_sync {
            self.on_attempt_complete();
        }
    }

    /// Examines the attempt's outcome and either finishes or redelivers.
    fn on_attempt_complete(self: Arc<Self>) {
        match self.decide() {
            Outcome::Finish => self.finish(),
            Outcome::Retry {
                delay,
                asynchronous,
            } => {
                let state = Arc::clone(&self);
                let task = Task::new("errorhandler::redeliver", move || state.run_attempt());
                if asynchronous {
                    drop(self.executor.schedule_delayed(task, delay));
                } else {
                    // Blocking wait is the configured behavior; the
                    // re-attempt still goes through the trampoline so the
                    // retry chain stays iterative.
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    self.executor.schedule_main(task);
                }
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn decide(&self) -> Outcome {
        let mut events: Vec<(&'static str, serde_json::Value)> = Vec::new();

        let outcome = {
            let mut guard = self.exchange.lock();
            let Some(failure) = guard.failure().cloned() else {
                return Outcome::Finish;
            };

            if failure.is_cancellation() {
                // Cancellation is not an error to recover from.
                return Outcome::Finish;
            }

            let Some(policy) = self.registry.resolve(&guard, &failure.kind) else {
                return Outcome::Finish;
            };

            let count = guard.redelivery_count();
            if policy.should_redeliver(&guard, count) {
                guard.clear_failure();
                let attempt = guard.increment_redelivery_count();

                if let Some(hook) = policy.redelivery_hook() {
                    if let Err(hook_failure) = hook.process(&mut guard) {
                        guard.set_failure(hook_failure);
                        return Outcome::Finish;
                    }
                }

                let redelivery = policy.redelivery().cloned().unwrap_or_default();
                let delay = redelivery.delay_for_attempt(attempt);
                redelivery.retry_attempted_log_level.log(
                    guard.id(),
                    attempt,
                    delay,
                    "redelivering exchange",
                );
                events.push((
                    "redelivery.attempt",
                    json!({
                        "handler": self.name,
                        "exchange_id": guard.id().to_string(),
                        "attempt": attempt,
                        "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    }),
                ));

                Outcome::Retry {
                    delay,
                    asynchronous: redelivery.asynchronous_delayed,
                }
            } else {
                if let Some(hook) = policy.exhausted_hook() {
                    if let Err(hook_failure) = hook.process(&mut guard) {
                        guard.set_failure(hook_failure);
                        return Outcome::Finish;
                    }
                }

                if count > 0 {
                    let redelivery = policy.redelivery().cloned().unwrap_or_default();
                    redelivery.retries_exhausted_log_level.log(
                        guard.id(),
                        count,
                        Duration::ZERO,
                        "redelivery exhausted",
                    );
                    events.push((
                        "redelivery.exhausted",
                        json!({
                            "handler": self.name,
                            "exchange_id": guard.id().to_string(),
                            "attempts": count,
                        }),
                    ));
                }

                if policy.is_handled(&guard) {
                    guard.clear_failure();
                    let caught = json!({
                        "kind": failure.kind.as_str(),
                        "message": failure.message,
                    });
                    let _ = guard.set_property(CAUGHT_FAILURE, caught);
                } else if policy.is_continued(&guard) {
                    guard.clear_failure();
                }
                // Otherwise the failure stays in the slot: fatal.

                Outcome::Finish
            }
        };

        for (event, data) in events {
            self.events.try_emit(event, Some(data));
        }
        outcome
    }

    fn finish(&self) {
        self.callback.done(self.handshake.note_finished());
    }
}
