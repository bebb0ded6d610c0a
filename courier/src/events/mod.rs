//! Event sink system for observability.
//!
//! Sinks are plain constructor arguments — the engine deliberately has no
//! global sink registry, so wiring stays explicit and testable.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Returns the default sink used when none is configured.
#[must_use]
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
