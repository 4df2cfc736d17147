//! # Update Broker
//!
//! A small multi-listener registry. Handlers are called synchronously, in
//! registration order, every time [`UpdateBroker::notify`] runs.
//!
//! `notify` copies the handler list before calling anything and releases the
//! lock, so a handler may register new handlers or dispose existing ones
//! (including itself) while a notification is in flight. Such changes apply from
//! the next notification on.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::trace;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

/// Registry of update handlers for values of type `T`.
pub struct UpdateBroker<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for UpdateBroker<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T> Default for UpdateBroker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for UpdateBroker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateBroker")
            .field("handlers", &self.len())
            .finish()
    }
}

impl<T> UpdateBroker<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                handlers: Vec::new(),
            })),
        }
    }

    /// Adds a handler and returns the handle that removes it.
    ///
    /// Dropping the returned [`Subscription`] leaves the handler registered.
    pub fn register<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
        T: 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, Arc::new(handler)));
        trace!(id, handlers = registry.handlers.len(), "Handler registered");

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            id,
            remove: Box::new(move |id| {
                if let Some(registry) = weak.upgrade() {
                    lock(&registry).handlers.retain(|(h, _)| *h != id);
                }
            }),
        }
    }

    /// Calls every handler registered before this call started.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = lock(&self.registry)
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in snapshot {
            handler(value);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`UpdateBroker::register`].
pub struct Subscription {
    id: u64,
    remove: Box<dyn FnOnce(u64) + Send + Sync>,
}

impl Subscription {
    /// Removes the handler. Safe to call from inside a notification.
    pub fn dispose(self) {
        trace!(id = self.id, "Handler disposed");
        (self.remove)(self.id)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
