//! Work items for the reactive executor.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A named, run-once unit of work.
pub struct Task {
    name: &'static str,
    run: Box<dyn FnOnce() + Send>,
}

impl Task {
    /// Creates a task. The name shows up in logs when a task misbehaves.
    pub fn new(name: &'static str, run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name,
            run: Box::new(run),
        }
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn into_run(self) -> (&'static str, Box<dyn FnOnce() + Send>) {
        (self.name, self.run)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// Runs a task, isolating panics so the pump thread survives.
///
/// A panic escaping a step is a scheduling failure: it is logged and
/// confined to that task. Steps that own an exchange convert panics into
/// the exchange's failure slot before they reach this point (see the
/// pipeline composer); anything arriving here is purely diagnostic.
pub(crate) fn run_isolated(task: Task) {
    let (name, run) = task.into_run();
    if let Err(panic) = catch_unwind(AssertUnwindSafe(run)) {
        let detail = panic_message(&panic);
        tracing::error!(task = name, detail = %detail, "scheduled task panicked");
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
