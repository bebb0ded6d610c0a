//! The single-shot completion continuation.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type CallbackFn = Box<dyn FnOnce(bool) + Send>;

struct Inner {
    fired: AtomicBool,
    action: Mutex<Option<CallbackFn>>,
}

/// An opaque, single-shot handle representing "what to do when this step
/// is finished".
///
/// The boolean passed to [`done`](AsyncCallback::done) records whether
/// completion happened synchronously on the calling thread. Invoking the
/// callback a second time is a programming error: it panics in debug
/// builds and is logged and ignored in release builds.
///
/// The handle is cheap to clone; all clones share the one-shot state.
#[derive(Clone)]
pub struct AsyncCallback {
    inner: Arc<Inner>,
}

impl AsyncCallback {
    /// Creates a callback around the given completion action.
    pub fn new(action: impl FnOnce(bool) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                action: Mutex::new(Some(Box::new(action))),
            }),
        }
    }

    /// A callback that does nothing, for fire-and-forget delivery.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Signals completion. `done_sync` is true when the step finished on
    /// the calling thread before returning.
    pub fn done(&self, done_sync: bool) {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            if cfg!(debug_assertions) {
                panic!("AsyncCallback invoked more than once");
            }
            tracing::error!("AsyncCallback invoked more than once; ignoring");
            return;
        }
        if let Some(action) = self.inner.action.lock().take() {
            action(done_sync);
        }
    }

    /// Returns true once the callback has fired.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }
}

/// Resolves the race between a composed step returning its sync/async
/// verdict and its continuation firing on another thread.
///
/// Exactly one side wins: if the finisher gets there first the call is
/// reported as synchronous completion (return `true`, continuation fired
/// with `done_sync = true`); otherwise the call returns `false` and the
/// continuation fires with `done_sync = false`. Never both.
pub(crate) struct SyncHandshake {
    state: std::sync::atomic::AtomicU8,
}

const RUNNING: u8 = 0;
const RETURNED: u8 = 1;
const FINISHED_SYNC: u8 = 2;

impl SyncHandshake {
    pub(crate) fn new() -> Self {
        Self {
            state: std::sync::atomic::AtomicU8::new(RUNNING),
        }
    }

    /// Called as `process()` returns. True if completion already won the
    /// race, i.e. the caller should report synchronous completion.
    pub(crate) fn note_returned(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, RETURNED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
    }

    /// Called by the finisher before firing the continuation. True if
    /// completion precedes the return, i.e. `done_sync` should be true.
    pub(crate) fn note_finished(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, FINISHED_SYNC, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for AsyncCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCallback")
            .field("fired", &self.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fires_once_with_sync_flag() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen_sync = Arc::new(AtomicBool::new(false));
        let (c, s) = (count.clone(), seen_sync.clone());

        let callback = AsyncCallback::new(move |done_sync| {
            c.fetch_add(1, Ordering::SeqCst);
            s.store(done_sync, Ordering::SeqCst);
        });

        assert!(!callback.has_fired());
        callback.done(true);
        assert!(callback.has_fired());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(seen_sync.load(Ordering::SeqCst));
    }

    #[test]
    fn test_clones_share_state() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let callback = AsyncCallback::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let clone = callback.clone();
        clone.done(false);
        assert!(callback.has_fired());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handshake_return_first() {
        let handshake = SyncHandshake::new();
        assert!(!handshake.note_returned());
        assert!(!handshake.note_finished());
    }

    #[test]
    fn test_handshake_finish_first() {
        let handshake = SyncHandshake::new();
        assert!(handshake.note_finished());
        assert!(handshake.note_returned());
    }

    #[test]
    #[should_panic(expected = "invoked more than once")]
    fn test_double_invocation_panics_in_debug() {
        let callback = AsyncCallback::noop();
        callback.done(true);
        callback.done(true);
    }
}
