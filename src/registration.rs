//! Disposable handles for resources registered through the host facade.
//!
//! Every facade registration (activity section, markdown provider, output
//! watcher, structured-event handler) returns a [`Registration`]. Disposing it
//! removes exactly that registration; disposing twice is a no-op. Dropping the
//! handle does NOT dispose; resources live until explicitly disposed or until
//! the owning plugin is unregistered.

use parking_lot::Mutex;

type Disposer = Box<dyn FnOnce() + Send>;

/// Handle to a single facade registration.
pub struct Registration {
    disposer: Mutex<Option<Disposer>>,
}

impl Registration {
    pub(crate) fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disposer: Mutex::new(Some(Box::new(dispose))),
        }
    }

    /// Handle to nothing; `dispose` has no effect. Returned when the runtime
    /// behind a stashed facade is already gone.
    pub(crate) fn inert() -> Self {
        Self {
            disposer: Mutex::new(None),
        }
    }

    /// Remove the underlying registration. Idempotent.
    pub fn dispose(&self) {
        if let Some(dispose) = self.disposer.lock().take() {
            dispose();
        }
    }

    /// True once `dispose` has run (or the handle was inert from the start).
    pub fn is_disposed(&self) -> bool {
        self.disposer.lock().is_none()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispose_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let reg = Registration::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!reg.is_disposed());
        reg.dispose();
        reg.dispose();
        reg.dispose();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(reg.is_disposed());
    }

    #[test]
    fn drop_does_not_dispose() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        {
            let _reg = Registration::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn inert_handle_is_already_disposed() {
        let reg = Registration::inert();
        assert!(reg.is_disposed());
        reg.dispose();
    }
}
