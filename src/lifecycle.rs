//! Disposable resources and their registration order

use parking_lot::Mutex;

use crate::error::Result;

/// A resource with an explicit teardown action.
///
/// Disposal failures are reported through the `Result` so the teardown
/// coordinator can log them and keep going; they are never propagated to
/// callers.
pub trait Disposable: Send {
    /// Release any resources held by this value
    fn dispose(&mut self) -> Result<()>;
}

/// Any `FnMut` teardown closure is usable as a disposable
impl<F> Disposable for F
where
    F: FnMut() -> Result<()> + Send,
{
    fn dispose(&mut self) -> Result<()> {
        self()
    }
}

/// Registration-ordered store of disposable resources
pub(crate) struct DisposableRegistry {
    inner: Mutex<Vec<(String, Box<dyn Disposable>)>>,
}

impl DisposableRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Register a disposable under an identifier. Re-registering replaces
    /// the action but keeps the original position in the teardown order.
    pub(crate) fn register(&self, id: &str, disposable: Box<dyn Disposable>) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.iter_mut().find(|(name, _)| name == id) {
            slot.1 = disposable;
        } else {
            inner.push((id.to_string(), disposable));
        }
    }

    /// Remove and return the disposable for an identifier, if any
    pub(crate) fn take(&self, id: &str) -> Option<Box<dyn Disposable>> {
        let mut inner = self.inner.lock();
        let position = inner.iter().position(|(name, _)| name == id)?;
        Some(inner.remove(position).1)
    }

    /// Registered identifiers in registration order
    pub(crate) fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}
