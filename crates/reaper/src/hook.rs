//! Process termination callbacks.

use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::Once;
use std::sync::PoisonError;

/// Work to run once when the process terminates.
pub type ExitCallback = Box<dyn FnOnce() + Send + 'static>;

/// A facility that runs callbacks at process termination.
pub trait ExitHook: Send + Sync {
    fn install(&self, callback: ExitCallback);
}

static PENDING: Mutex<Vec<ExitCallback>> = Mutex::new(Vec::new());
static REGISTER: Once = Once::new();

extern "C" fn run_pending_callbacks() {
    let callbacks = std::mem::take(&mut *PENDING.lock().unwrap_or_else(PoisonError::into_inner));
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            tracing::error!("exit callback panicked");
        }
    }
}

/// Runs callbacks from a `libc::atexit` handler.
///
/// Covers a normal return from `main`, `std::process::exit` and a panicking
/// main thread. A process killed by a signal never gets here; the watchdog
/// covers that case.
#[derive(Debug, Default, Clone, Copy)]
pub struct AtExitHook;

impl ExitHook for AtExitHook {
    fn install(&self, callback: ExitCallback) {
        PENDING
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
        REGISTER.call_once(|| {
            // SAFETY: `run_pending_callbacks` is a plain `extern "C" fn()` that
            // catches every panic before returning.
            let rc = unsafe { libc::atexit(run_pending_callbacks) };
            if rc != 0 {
                tracing::warn!(rc, "failed to register atexit handler; exit cleanup disabled");
            }
        });
    }
}

/// Holds callbacks until the host calls [`ManualExitHook::fire`].
///
/// For hosts with their own shutdown notification, and for tests.
#[derive(Default)]
pub struct ManualExitHook {
    installs: AtomicUsize,
    callbacks: Mutex<Vec<ExitCallback>>,
}

impl ManualExitHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many callbacks have been installed so far.
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Runs and forgets every installed callback.
    pub fn fire(&self) {
        for callback in self.take_callbacks() {
            callback();
        }
    }

    /// Drops every installed callback without running it.
    ///
    /// Callbacks own whatever they capture; hosts that shut down without
    /// firing call this to release it.
    pub fn discard(&self) {
        drop(self.take_callbacks());
    }

    fn take_callbacks(&self) -> Vec<ExitCallback> {
        std::mem::take(&mut *self.callbacks.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ExitHook for ManualExitHook {
    fn install(&self, callback: ExitCallback) {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn manual_hook_fires_each_callback_once() {
        let hook = ManualExitHook::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let fired = fired.clone();
            hook.install(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }

        hook.fire();
        hook.fire();

        assert_eq!(hook.install_count(), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn discarded_callbacks_never_run() {
        let hook = ManualExitHook::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        hook.install(Box::new(move || flag.store(true, Ordering::SeqCst)));

        hook.discard();
        hook.fire();

        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(Arc::strong_count(&fired), 1);
    }

    #[test]
    fn atexit_hook_queues_callbacks() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        AtExitHook.install(Box::new(move || flag.store(true, Ordering::SeqCst)));

        // runs only when the test binary exits
        assert!(!ran.load(Ordering::SeqCst));
        assert!(!PENDING.lock().unwrap().is_empty());
    }
}
