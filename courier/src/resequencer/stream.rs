//! Stream resequencing: emit as soon as the sequence allows.

use super::{GapPolicy, SequenceComparator, StreamConfig};
use crate::errors::ConfigError;
use crate::events::{default_sink, EventSink};
use crate::exchange::{ExchangeRef, SEQUENCE_KEY};
use crate::processor::{AsyncCallback, AsyncProcessor};
use crate::reactive::{ReactiveExecutor, ScheduledTask, Task};
use parking_lot::Mutex;
use serde_json::json;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Keeps a sliding sorted buffer and emits exchanges in sequence order.
///
/// An exchange goes out as soon as it is the immediate successor of the
/// last emitted one. When the sequence has a gap, the buffered head waits
/// until its timeout expires, the buffer overflows its capacity, or —
/// under [`GapPolicy::ForceEmit`] — not at all. Exchanges without a
/// derivable sequence position bypass the buffer entirely and are
/// delivered immediately.
pub struct StreamResequencer {
    core: Arc<Core>,
}

impl StreamResequencer {
    /// Creates a stream resequencer delivering to `downstream`.
    pub fn new(
        name: impl Into<String>,
        config: StreamConfig,
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
                state: Mutex::new(StreamState::default()),
                timer: Mutex::new(None),
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
                state: Mutex::new(StreamState::default()),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Returns the resequencer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Number of exchanges waiting in the buffer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.core.state.lock().pending.len()
    }
}

impl AsyncProcessor for StreamResequencer {
    fn process(&self, exchange: &ExchangeRef, callback: AsyncCallback) -> bool {
        Core::ingest(&self.core, exchange);
        callback.done(true);
        true
    }
}

struct PendingEntry {
    exchange: ExchangeRef,
    arrived_at: Instant,
}

#[derive(Default)]
struct StreamState {
    // Sorted by sequence position; equal positions keep arrival order.
    pending: Vec<PendingEntry>,
    last_emitted: Option<ExchangeRef>,
}

struct Core {
    name: String,
    config: StreamConfig,
    comparator: Arc<dyn SequenceComparator>,
    downstream: Arc<dyn AsyncProcessor>,
    executor: Arc<ReactiveExecutor>,
    events: Arc<dyn EventSink>,
    state: Mutex<StreamState>,
    timer: Mutex<Option<ScheduledTask>>,
}

impl Core {
    fn ingest(core: &Arc<Self>, exchange: &ExchangeRef) {
        {
            let mut guard = exchange.lock();
            if !core.comparator.is_valid(&guard) {
                drop(guard);
                core.deliver(exchange, "resequencer.unordered");
                return;
            }
            if let Some(key) = core.comparator.key_of(&guard) {
                let _ = guard.set_property(SEQUENCE_KEY, key);
            }
        }

        let ready = {
            let mut state = core.state.lock();
            let position = state.pending.partition_point(|entry| {
                core.comparator
                    .compare(&entry.exchange.lock(), &exchange.lock())
                    != Ordering::Greater
            });
            state.pending.insert(
                position,
                PendingEntry {
                    exchange: exchange.clone(),
                    arrived_at: Instant::now(),
                },
            );
            core.collect_ready(&mut state)
        };

        for exchange in &ready {
            core.deliver(exchange, "resequencer.emitted");
        }
        Self::rearm(core);
    }

    /// Pops every head that may go out, updating the emission cursor.
    fn collect_ready(&self, state: &mut StreamState) -> Vec<ExchangeRef> {
        let now = Instant::now();
        let mut ready = Vec::new();

        // Overflow force-delivers from the head regardless of gaps.
        while state.pending.len() > self.config.capacity {
            let entry = state.pending.remove(0);
            state.last_emitted = Some(entry.exchange.clone());
            ready.push(entry.exchange);
        }

        while let Some(head) = state.pending.first() {
            let in_sequence = state.last_emitted.as_ref().is_some_and(|last| {
                self.comparator
                    .successor(&head.exchange.lock(), &last.lock())
            });
            let emit = in_sequence
                || self.config.gap_policy == GapPolicy::ForceEmit
                || now.duration_since(head.arrived_at) >= self.config.timeout;
            if !emit {
                break;
            }
            let entry = state.pending.remove(0);
            state.last_emitted = Some(entry.exchange.clone());
            ready.push(entry.exchange);
        }
        ready
    }

    /// Re-points the single timeout timer at the current head's deadline.
    fn rearm(core: &Arc<Self>) {
        let next_delay = {
            let state = core.state.lock();
            state
                .pending
                .first()
                .map(|head| core.config.timeout.saturating_sub(head.arrived_at.elapsed()))
        };

        let mut timer = core.timer.lock();
        if let Some(previous) = timer.take() {
            previous.cancel();
        }
        if let Some(delay) = next_delay {
            let timer_core = Arc::clone(core);
            *timer = Some(core.executor.schedule_delayed(
                Task::new("resequencer::stream-timeout", move || {
                    Self::on_timeout(&timer_core);
                }),
                delay,
            ));
        }
    }

    fn on_timeout(core: &Arc<Self>) {
        let ready = {
            let mut state = core.state.lock();
            core.collect_ready(&mut state)
        };
        for exchange in &ready {
            core.deliver(exchange, "resequencer.emitted");
        }
        Self::rearm(core);
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
