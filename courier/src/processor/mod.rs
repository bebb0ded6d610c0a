//! Processor contracts: the single extension point of the engine.
//!
//! Every pipeline step implements [`AsyncProcessor`]: it accepts an
//! exchange plus a continuation and reports, through its return value,
//! whether it completed synchronously before returning. Synchronous steps
//! implement the simpler [`Processor`] and are adapted automatically.

pub mod callback;
pub mod driver;

pub use callback::AsyncCallback;
pub use driver::ProcessorDriver;

use crate::exchange::{Exchange, ExchangeRef, Failure};
use std::fmt::Debug;
use std::sync::Arc;

/// The asynchronous processor contract.
///
/// `process` returns `true` if the step already completed synchronously
/// before returning, `false` if it will complete later by firing
/// `callback` exactly once. The return value is authoritative: callers
/// continue inline on `true` and suspend on `false`, never both.
///
/// Implementations must invoke the callback exactly once on every path,
/// passing `true` only when completion happened on the calling thread.
pub trait AsyncProcessor: Send + Sync {
    /// Processes the exchange, completing now or later via `callback`.
    fn process(&self, exchange: &ExchangeRef, callback: AsyncCallback) -> bool;
}

/// The synchronous processor contract.
///
/// A failure result is captured into the exchange's failure slot by the
/// adapter; the step never sees the continuation machinery.
pub trait Processor: Send + Sync {
    /// Processes the exchange in place.
    fn process(&self, exchange: &mut Exchange) -> Result<(), Failure>;
}

impl<P: Processor> AsyncProcessor for P {
    fn process(&self, exchange: &ExchangeRef, callback: AsyncCallback) -> bool {
        {
            let mut guard = exchange.lock();
            if let Err(failure) = Processor::process(self, &mut guard) {
                guard.set_failure(failure);
            }
        }
        callback.done(true);
        true
    }
}

/// A simple function-based synchronous processor.
pub struct FnProcessor<F>
where
    F: Fn(&mut Exchange) -> Result<(), Failure> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&mut Exchange) -> Result<(), Failure> + Send + Sync,
{
    /// Creates a new function-based processor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    /// Returns the processor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<F> Debug for FnProcessor<F>
where
    F: Fn(&mut Exchange) -> Result<(), Failure> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProcessor")
            .field("name", &self.name)
            .finish()
    }
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(&mut Exchange) -> Result<(), Failure> + Send + Sync,
{
    fn process(&self, exchange: &mut Exchange) -> Result<(), Failure> {
        (self.func)(exchange)
    }
}

/// A no-op processor for testing and wiring placeholders.
#[derive(Debug, Clone, Default)]
pub struct NoOpProcessor;

impl NoOpProcessor {
    /// Creates a new no-op processor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Processor for NoOpProcessor {
    fn process(&self, _exchange: &mut Exchange) -> Result<(), Failure> {
        Ok(())
    }
}

/// Convenience: an owned, shareable async processor.
pub type SharedProcessor = Arc<dyn AsyncProcessor>;
