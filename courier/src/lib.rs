//! # Courier
//!
//! A message-routing mediation engine built around a cooperative
//! continuation-passing core.
//!
//! Courier provides the building blocks of a routing engine:
//!
//! - **Exchanges**: the unit of work, carrying messages, properties, and
//!   a captured failure slot across step and thread boundaries
//! - **Processors**: a two-level contract where synchronous steps stay
//!   simple and asynchronous steps signal completion through a
//!   single-shot continuation
//! - **Pipelines**: ordered composition with inline advancement through
//!   synchronous runs and trampoline-driven resumption after suspension
//! - **Error handling**: hierarchical failure classification, exception
//!   policies, and redelivery with exponential backoff
//! - **Resequencing**: batch and stream reordering of out-of-order
//!   exchange streams
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let executor = Arc::new(ReactiveExecutor::new()?);
//! let pipeline: Arc<dyn AsyncProcessor> = Arc::new(
//!     Pipeline::builder("greeting", executor.clone())
//!         .step(Arc::new(FnProcessor::new("greet", |exchange: &mut Exchange| {
//!             exchange.input_mut().map_err(Failure::from)?.set_body(json!("hello"));
//!             Ok(())
//!         })))
//!         .build(),
//! );
//!
//! let driver = ProcessorDriver::new(executor);
//! let exchange = Exchange::one_way(json!(null)).into_ref();
//! driver.process_and_wait(&pipeline, &exchange)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod errorhandler;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod observability;
pub mod pipeline;
pub mod processor;
pub mod reactive;
pub mod resequencer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errorhandler::{
        ErrorHandler, ErrorPolicyRegistry, ExceptionPolicy, PolicyDecision, RedeliveryPolicy,
        RetryLogLevel,
    };
    pub use crate::errors::{ConfigError, CourierError, ExchangeError, ProcessingError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::exchange::{
        Exchange, ExchangePattern, ExchangeRef, ExchangeStatus, Failure, FailureKind, Headers,
        Message,
    };
    pub use crate::pipeline::{Pipeline, PipelineBuilder};
    pub use crate::processor::{
        AsyncCallback, AsyncProcessor, FnProcessor, NoOpProcessor, Processor, ProcessorDriver,
        SharedProcessor,
    };
    pub use crate::reactive::{ReactiveExecutor, ScheduledTask, Task};
    pub use crate::resequencer::{
        BatchConfig, BatchResequencer, GapPolicy, HeaderSequenceComparator, SequenceComparator,
        StreamConfig, StreamResequencer,
    };
}
