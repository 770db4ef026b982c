//! Handler subscription lists for wrappers exposing notification
//! capabilities.
//!
//! The list is mutated under a short-held mutex, but raising takes an
//! immutable snapshot before invoking anything, so a handler that subscribes
//! or unsubscribes during its own invocation neither deadlocks nor corrupts
//! iteration.
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Opaque registration token returned by [`EventSource::add`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EventToken(i64);

pub struct EventSource<T: ?Sized> {
    handlers: Mutex<Vec<(EventToken, Arc<T>)>>,
    next_token: AtomicI64,
}

impl<T: ?Sized> Default for EventSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> EventSource<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_token: AtomicI64::new(1),
        }
    }

    pub fn add(&self, handler: Arc<T>) -> EventToken {
        let token = EventToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((token, handler));
        token
    }

    /// Remove a registration. Unknown tokens are ignored; a handler removed
    /// mid-raise still sees the invocation already snapshotted.
    pub fn remove(&self, token: EventToken) -> bool {
        let mut handlers = self.handlers.lock();
        match handlers.iter().position(|(t, _)| *t == token) {
            Some(idx) => {
                handlers.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Invoke `invoke` for every handler subscribed at the time of the call.
    pub fn raise(&self, mut invoke: impl FnMut(&T)) {
        let snapshot: Vec<Arc<T>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in &snapshot {
            invoke(handler);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }
}
