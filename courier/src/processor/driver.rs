//! Entry points for callers outside the engine.
//!
//! A driver bridges the continuation contract to the two caller-facing
//! shapes: a blocking "process and wait" and a fire-and-notify
//! "process async". Both surface the same root cause and redelivery
//! count on failure.

use super::{AsyncCallback, AsyncProcessor};
use crate::errors::ProcessingError;
use crate::exchange::{kinds, ExchangeRef, Failure, FailureKind};
use crate::reactive::{ReactiveExecutor, Task};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Drives exchanges through a processor on behalf of external callers.
#[derive(Clone)]
pub struct ProcessorDriver {
    executor: Arc<ReactiveExecutor>,
}

impl ProcessorDriver {
    /// Creates a driver over the given executor.
    #[must_use]
    pub fn new(executor: Arc<ReactiveExecutor>) -> Self {
        Self { executor }
    }

    /// Processes the exchange and blocks the calling thread until the
    /// top-level continuation fires.
    ///
    /// On failure the error carries the final failure cause and the
    /// redelivery count, matching what an asynchronous caller would read
    /// from the exchange.
    pub fn process_and_wait(
        &self,
        processor: &Arc<dyn AsyncProcessor>,
        exchange: &ExchangeRef,
    ) -> Result<(), ProcessingError> {
        let (tx, rx) = mpsc::channel();
        let callback = AsyncCallback::new(move |_| {
            let _ = tx.send(());
        });

        let done_sync = processor.process(exchange, callback);
        if !done_sync && rx.recv().is_err() {
            tracing::error!("completion signal lost; inspecting exchange state directly");
        }
        Self::settle(exchange)
    }

    /// Like [`process_and_wait`](Self::process_and_wait) but gives up
    /// after `timeout`. The exchange keeps running; only the wait is
    /// abandoned.
    pub fn process_and_wait_timeout(
        &self,
        processor: &Arc<dyn AsyncProcessor>,
        exchange: &ExchangeRef,
        timeout: Duration,
    ) -> Result<(), ProcessingError> {
        let (tx, rx) = mpsc::channel();
        let callback = AsyncCallback::new(move |_| {
            let _ = tx.send(());
        });

        let done_sync = processor.process(exchange, callback);
        if !done_sync && rx.recv_timeout(timeout).is_err() {
            let guard = exchange.lock();
            return Err(ProcessingError {
                exchange_id: guard.id(),
                failure: Failure::new(
                    FailureKind::new(kinds::TIMEOUT),
                    format!("no completion within {timeout:?}"),
                ),
                redelivery_count: guard.redelivery_count(),
            });
        }
        Self::settle(exchange)
    }

    /// Processes the exchange and notifies `callback` when the top-level
    /// continuation fires. Returns whether completion was synchronous.
    pub fn process_async(
        &self,
        processor: &Arc<dyn AsyncProcessor>,
        exchange: &ExchangeRef,
        callback: AsyncCallback,
    ) -> bool {
        let settled = exchange.clone();
        let wrapped = AsyncCallback::new(move |done_sync| {
            let _ = Self::settle(&settled);
            callback.done(done_sync);
        });
        processor.process(exchange, wrapped)
    }

    /// Submits the exchange as independent new work on the executor's
    /// pool; the caller is notified via `callback` (always
    /// asynchronously).
    pub fn submit(
        &self,
        processor: Arc<dyn AsyncProcessor>,
        exchange: ExchangeRef,
        callback: AsyncCallback,
    ) {
        let driver = self.clone();
        self.executor.schedule(Task::new("driver::submit", move || {
            driver.process_async(&processor, &exchange, callback);
        }));
    }

    /// Marks the terminal state from the failure slot and converts a
    /// failed exchange into the caller-facing error.
    fn settle(exchange: &ExchangeRef) -> Result<(), ProcessingError> {
        let mut guard = exchange.lock();
        if let Some(failure) = guard.failure().cloned() {
            guard.mark_failed();
            Err(ProcessingError {
                exchange_id: guard.id(),
                failure,
                redelivery_count: guard.redelivery_count(),
            })
        } else {
            guard.mark_completed();
            Ok(())
        }
    }
}
