//! # Cached Resource
//!
//! [`CachedResource`] turns a one-shot [`ResourceLoader`] into a value that many
//! parties can observe: synchronously through [`peek`](CachedResource::peek) and
//! [`has_loaded`](CachedResource::has_loaded), or asynchronously through
//! [`wait`](CachedResource::wait).
//!
//! The state lives in a `tokio::sync::watch` channel. A synchronous loader result
//! seeds the channel directly; a pending result is driven to completion on its own
//! Tokio task, which publishes exactly one terminal state.

use crate::error::FrameworkError;
use crate::loader::{LoadOutcome, ResourceLoader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Observable state of a [`CachedResource`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceState<T> {
    Loading,
    Loaded(T),
    Failed(FrameworkError),
}

impl<T> ResourceState<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResourceState::Loading)
    }
}

/// A single-shot, eventually-available value.
///
/// Cloning is cheap: clones share the same underlying load.
#[derive(Debug, Clone)]
pub struct CachedResource<T> {
    state: watch::Receiver<ResourceState<T>>,
}

impl<T> CachedResource<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Starts loading immediately.
    ///
    /// The loader is invoked exactly once, before this returns. If it produces a
    /// pending future, that future is spawned on the current Tokio runtime.
    pub fn new(loader: Box<dyn ResourceLoader<T>>) -> Self {
        let resource_type = short_type_name::<T>();

        match loader.load() {
            LoadOutcome::Ready(value) => {
                debug!(resource_type, "Loaded synchronously");
                let (_sender, receiver) = watch::channel(ResourceState::Loaded(value));
                Self { state: receiver }
            }
            LoadOutcome::Pending(future) => {
                debug!(resource_type, "Load pending");
                let (sender, receiver) = watch::channel(ResourceState::Loading);
                tokio::spawn(async move {
                    let next = match future.await {
                        Ok(value) => {
                            info!(resource_type, "Loaded");
                            ResourceState::Loaded(value)
                        }
                        Err(e) => {
                            warn!(resource_type, error = %e, "Load failed");
                            ResourceState::Failed(e)
                        }
                    };
                    sender.send_replace(next);
                });
                Self { state: receiver }
            }
        }
    }

    /// Returns the loaded value, if any.
    pub fn peek(&self) -> Option<T> {
        match &*self.state.borrow() {
            ResourceState::Loaded(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn has_loaded(&self) -> bool {
        matches!(&*self.state.borrow(), ResourceState::Loaded(_))
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ResourceState<T> {
        self.state.borrow().clone()
    }

    /// Waits for the first (and only) value the loader produces.
    ///
    /// Always returns a future, even when the value was available synchronously.
    pub async fn wait(&self) -> Result<T, FrameworkError> {
        let mut receiver = self.state.clone();
        let result = match receiver.wait_for(ResourceState::is_terminal).await {
            Ok(state) => terminal_result(&state),
            Err(_) => Err(FrameworkError::Abandoned),
        };
        result
    }
}

fn terminal_result<T: Clone>(state: &ResourceState<T>) -> Result<T, FrameworkError> {
    match state {
        ResourceState::Loaded(value) => Ok(value.clone()),
        ResourceState::Failed(e) => Err(e.clone()),
        ResourceState::Loading => Err(FrameworkError::Abandoned),
    }
}

/// Type name without its module path, used as a structured log field.
pub(crate) fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
