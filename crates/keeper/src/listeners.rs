use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use kv_keeper_store::{Error, Result};
use parking_lot::RwLock;
use tracing::trace;

/// Callback invoked with every error a storage operation produces.
pub type ErrorListener = Arc<dyn Fn(&Error) + Send + Sync>;

/// Ordered set of error listeners shared by a keeper and its storages.
#[derive(Clone, Default)]
pub struct ErrorListeners {
    listeners: Arc<RwLock<Vec<ErrorListener>>>,
}

impl ErrorListeners {
    /// Appends a listener. The same listener may be added more than once.
    pub fn add(&self, listener: ErrorListener) {
        self.listeners.write().push(listener);
    }

    /// Removes the first registration of `listener`.
    pub fn remove(&self, listener: &ErrorListener) -> bool {
        let mut listeners = self.listeners.write();
        listeners
            .iter()
            .position(|registered| Arc::ptr_eq(registered, listener))
            .map(|index| listeners.remove(index))
            .is_some()
    }

    /// The registered listeners in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ErrorListener> {
        self.listeners.read().clone()
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Calls every listener with `error`, in registration order.
    ///
    /// Listeners run on a snapshot, so one may add or remove listeners
    /// without affecting the current notification.
    pub fn notify(&self, error: &Error) {
        let listeners = self.snapshot();
        trace!(listeners = listeners.len(), %error, "notifying error listeners");

        for listener in &listeners {
            listener(error);
        }
    }

    /// Notifies listeners of a failed result before handing it back.
    pub(crate) fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            self.notify(error);
        }
        result
    }
}

impl Debug for ErrorListeners {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ErrorListeners")
            .field("len", &self.len())
            .finish()
    }
}
