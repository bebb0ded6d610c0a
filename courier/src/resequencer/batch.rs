//! Batch resequencing: collect, sort, release.

use super::{BatchConfig, SequenceComparator};
use crate::errors::ConfigError;
use crate::events::{default_sink, EventSink};
use crate::exchange::{ExchangeRef, SEQUENCE_KEY};
use crate::processor::{AsyncCallback, AsyncProcessor};
use crate::reactive::{ReactiveExecutor, Task};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

/// Collects exchanges into a batch and releases the batch sorted.
///
/// A batch closes when it reaches the configured size or when its oldest
/// exchange has waited out the timeout, whichever comes first. Ingestion
/// itself always completes synchronously; delivery of sorted batches
/// happens downstream with a fire-and-forget continuation.
pub struct BatchResequencer {
    core: Arc<Core>,
}

impl BatchResequencer {
    /// Creates a batch resequencer delivering to `downstream`.
    pub fn new(
        name: impl Into<String>,
        config: BatchConfig,
        comparator: Arc<dyn SequenceComparator>,
        downstream: Arc<dyn AsyncProcessor>,
        executor: Arc<ReactiveExecutor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            core: Arc::new(Core {
                name: name.into(),
                config,
                comparator,
                downstream,
                executor,
                events: default_sink(),
                buffer: Mutex::new(Buffer::default()),
            }),
        })
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(self, events: Arc<dyn EventSink>) -> Self {
        let core = &self.core;
        Self {
            core: Arc::new(Core {
                name: core.name.clone(),
                config: core.config.clone(),
                comparator: Arc::clone(&core.comparator),
                downstream: Arc::clone(&core.downstream),
                executor: Arc::clone(&core.executor),
                events,
                buffer: Mutex::new(Buffer::default()),
            }),
        }
    }

    /// Returns the resequencer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Number of exchanges waiting in the open batch.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.core.buffer.lock().items.len()
    }
}

impl AsyncProcessor for BatchResequencer {
    fn process(&self, exchange: &ExchangeRef, callback: AsyncCallback) -> bool {
        Core::ingest(&self.core, exchange);
        callback.done(true);
        true
    }
}

#[derive(Default)]
struct Buffer {
    items: Vec<ExchangeRef>,
    // Bumped on every flush so a stale timeout cannot flush a newer batch.
    generation: u64,
}

struct Core {
    name: String,
    config: BatchConfig,
    comparator: Arc<dyn SequenceComparator>,
    downstream: Arc<dyn AsyncProcessor>,
    executor: Arc<ReactiveExecutor>,
    events: Arc<dyn EventSink>,
    buffer: Mutex<Buffer>,
}

impl Core {
    fn ingest(core: &Arc<Self>, exchange: &ExchangeRef) {
        {
            let mut guard = exchange.lock();
            if !core.comparator.is_valid(&guard) {
                drop(guard);
                core.deliver_unordered(exchange);
                return;
            }
            if let Some(key) = core.comparator.key_of(&guard) {
                let _ = guard.set_property(SEQUENCE_KEY, key);
            }
        }

        let flushed = {
            let mut buffer = core.buffer.lock();
            buffer.items.push(exchange.clone());
            if buffer.items.len() >= core.config.batch_size {
                Some(Self::close_batch(&mut buffer))
            } else {
                if buffer.items.len() == 1 {
                    Self::arm_timeout(core, buffer.generation);
                }
                None
            }
        };

        if let Some(batch) = flushed {
            core.release(batch);
        }
    }

    fn arm_timeout(core: &Arc<Self>, generation: u64) {
        let timer_core = Arc::clone(core);
        drop(core.executor.schedule_delayed(
            Task::new("resequencer::batch-timeout", move || {
                timer_core.flush_generation(generation);
            }),
            core.config.timeout,
        ));
    }

    fn flush_generation(&self, generation: u64) {
        let batch = {
            let mut buffer = self.buffer.lock();
            if buffer.generation != generation {
                // The batch this timer was armed for already went out.
                return;
            }
            Self::close_batch(&mut buffer)
        };
        self.release(batch);
    }

    fn close_batch(buffer: &mut Buffer) -> Vec<ExchangeRef> {
        buffer.generation += 1;
        std::mem::take(&mut buffer.items)
    }

    fn release(&self, mut batch: Vec<ExchangeRef>) {
        batch.sort_by(|a, b| self.comparator.compare(&a.lock(), &b.lock()));
        for exchange in batch {
            self.deliver(&exchange, "resequencer.emitted");
        }
    }

    fn deliver_unordered(&self, exchange: &ExchangeRef) {
        self.deliver(exchange, "resequencer.unordered");
    }

    fn deliver(&self, exchange: &ExchangeRef, event: &str) {
        let data = {
            let guard = exchange.lock();
            json!({
                "resequencer": self.name,
                "exchange_id": guard.id().to_string(),
                "key": guard.property(SEQUENCE_KEY),
            })
        };
        self.events.try_emit(event, Some(data));
        self.downstream.process(exchange, AsyncCallback::noop());
    }
}
