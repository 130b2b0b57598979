//! Strong handles over managed objects.

use std::fmt;
use std::sync::Arc;

use crate::error::DebugError;
use crate::surface::ValueRef;

/// Backing implementation of a strong handle.
///
/// Implemented by the runtime surface. `release` is called exactly once,
/// when the last [`StrongHandle`] clone is dropped.
pub trait RawHandle: Send + Sync {
    /// Re-dereference the handle into a fresh value.
    ///
    /// Raw values read before a resume are invalid afterwards; the handle is
    /// the only stable way back to the object.
    fn dereference(&self) -> Result<ValueRef, DebugError>;

    /// Release the pin on the underlying object.
    fn release(&self);
}

struct HandleInner {
    backing: Box<dyn RawHandle>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.backing.release();
    }
}

/// An owned strong reference that pins a managed object across resume
/// events.
///
/// Cloning bumps the reference count; the underlying runtime handle is
/// released when the last clone is dropped. Never cache the result of
/// [`StrongHandle::dereference`] across a resume; re-dereference instead.
#[derive(Clone)]
pub struct StrongHandle {
    inner: Arc<HandleInner>,
}

impl StrongHandle {
    /// Wrap a runtime-provided handle.
    #[must_use]
    pub fn new(backing: Box<dyn RawHandle>) -> Self {
        Self {
            inner: Arc::new(HandleInner { backing }),
        }
    }

    /// Fetch a fresh value for the pinned object.
    pub fn dereference(&self) -> Result<ValueRef, DebugError> {
        self.inner.backing.dereference()
    }
}

impl fmt::Debug for StrongHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrongHandle")
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct CountingHandle {
        released: Arc<AtomicU32>,
    }

    impl RawHandle for CountingHandle {
        fn dereference(&self) -> Result<ValueRef, DebugError> {
            Err(DebugError::NullReference)
        }

        fn release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn release_fires_once_after_last_clone() {
        let released = Arc::new(AtomicU32::new(0));
        let handle = StrongHandle::new(Box::new(CountingHandle {
            released: released.clone(),
        }));
        let clone = handle.clone();
        drop(handle);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(clone);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
