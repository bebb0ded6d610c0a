//! The pipeline composer.
//!
//! Chains an ordered list of processors into one processor with the same
//! contract, advancing through synchronous completions inline and
//! resuming after asynchronous completions via the reactive executor's
//! trampoline. Progress is held in an explicit state object (the current
//! step index), not in language-level recursion, so stack usage stays
//! O(1) per suspension.


use crate::events::{default_sink, EventSink};
use crate::exchange::{ExchangeRef, Failure};
use crate::processor::callback::SyncHandshake;
use crate::processor::{AsyncCallback, AsyncProcessor};
use crate::reactive::{panic_message, ReactiveExecutor, Task};
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An ordered list of processors composed into one processor.
pub struct Pipeline {
    name: String,
    processors: Arc<Vec<Arc<dyn AsyncProcessor>>>,
    executor: Arc<ReactiveExecutor>,
    events: Arc<dyn EventSink>,
}

impl Pipeline {
    /// Starts building a pipeline.
    #[must_use]
    pub fn builder(name: impl Into<String>, executor: Arc<ReactiveExecutor>) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            executor,
            processors: Vec::new(),
            events: default_sink(),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of composed steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Returns true if the pipeline has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl AsyncProcessor for Pipeline {
    fn process(&self, exchange: &ExchangeRef, callback: AsyncCallback) -> bool {
        if self.processors.is_empty() {
            callback.done(true);
            return true;
        }

        let state = Arc::new(PipelineState {
            name: self.name.clone(),
            processors: Arc::clone(&self.processors),
            executor: Arc::clone(&self.executor),
            events: Arc::clone(&self.events),
            exchange: exchange.clone(),
            callback,
            index: AtomicUsize::new(0),
            handshake: SyncHandshake::new(),
        });

        // Drive through the trampoline so nested pipelines share one lane
        // instead of growing the native stack.
        let driver = Arc::clone(&state);
        self.executor
            .schedule_main(Task::new("pipeline::drive", move || driver.drive()));

        state.handshake.note_returned()
    }
}

struct PipelineState {
    name: String,
    processors: Arc<Vec<Arc<dyn AsyncProcessor>>>,
    executor: Arc<ReactiveExecutor>,
    events: Arc<dyn EventSink>,
    exchange: ExchangeRef,
    callback: AsyncCallback,
    index: AtomicUsize,
    handshake: SyncHandshake,
}

impl PipelineState {
    /// Advances through steps until the chain suspends or terminates.
    fn drive(self: Arc<Self>) {
        loop {
            let index = self.index.load(Ordering::Acquire);
            {
                let mut guard = self.exchange.lock();
                if guard.is_cancelled() && !guard.has_failure() {
                    guard.set_failure(Failure::cancelled("cancelled between pipeline steps"));
                }
                if guard.has_failure() || index >= self.processors.len() {
                    drop(guard);
                    self.finish();
                    return;
                }
            }
            self.index.store(index + 1, Ordering::Release);

            let resume = Arc::clone(&self);
            let step_callback = AsyncCallback::new(move |done_sync| {
                if !done_sync {
                    let driver = Arc::clone(&resume);
                    resume
                        .executor
                        .schedule_main(Task::new("pipeline::resume", move || driver.drive()));
                }
            });

            let done_sync = self.invoke_step(index, step_callback);
            if !done_sync {
                return;
            }
        }
    }

    /// Invokes step `index`, converting an escaping panic into the
    /// exchange's failure slot so the chain still terminates.
    fn invoke_step(&self, index: usize, callback: AsyncCallback) -> bool {
        let processor = &self.processors[index];
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            processor.process(&self.exchange, callback.clone())
        }));
        match outcome {
            Ok(done_sync) => done_sync,
            Err(panic) => {
                let detail = panic_message(&panic);
                tracing::error!(
                    pipeline = %self.name,
                    step = index,
                    detail = %detail,
                    "pipeline step panicked"
                );
                if callback.has_fired() {
                    // The step completed (possibly scheduling a resume)
                    // before panicking; trust the continuation path.
                    return false;
                }
                self.exchange.lock().set_failure(Failure::from_panic(detail));
                true
            }
        }
    }

    /// Fires the pipeline's own continuation exactly once, with the
    /// exchange in its final state. Does not re-enter the executor.
    fn finish(&self) {
        let (event, data) = {
            let guard = self.exchange.lock();
            let event = if guard.has_failure() {
                "exchange.failed"
            } else {
                "exchange.completed"
            };
            let data = json!({
                "pipeline": self.name,
                "exchange_id": guard.id().to_string(),
                "redeliveries": guard.redelivery_count(),
            });
            (event, data)
        };
        self.events.try_emit(event, Some(data));

        self.callback.done(self.handshake.note_finished());
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    name: String,
    executor: Arc<ReactiveExecutor>,
    processors: Vec<Arc<dyn AsyncProcessor>>,
    events: Arc<dyn EventSink>,
}

impl PipelineBuilder {
    /// Appends a processing step.
    #[must_use]
    pub fn step(mut self, processor: Arc<dyn AsyncProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            name: self.name,
            processors: Arc::new(self.processors),
            executor: self.executor,
            events: self.events,
        }
    }
}
