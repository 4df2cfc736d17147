//! # ResourceLoader Trait
//!
//! A `ResourceLoader` supplies a value that is either available right now or will
//! be available later. The two cases are modelled explicitly by [`LoadOutcome`] so
//! callers never have to guess whether they hold a future or a value.
//!
//! Loaders are consumed by [`CachedResource`](crate::CachedResource), which calls
//! [`ResourceLoader::load`] exactly once. Taking `self: Box<Self>` makes a second
//! call impossible at compile time.

use crate::error::FrameworkError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future produced by a pending load.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, FrameworkError>> + Send + 'static>>;

/// Result of invoking a loader.
pub enum LoadOutcome<T> {
    /// The value was available synchronously.
    Ready(T),
    /// The value will be produced by the future.
    Pending(BoxFuture<T>),
}

impl<T> LoadOutcome<T> {
    /// Wraps a future as a pending outcome.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, FrameworkError>> + Send + 'static,
    {
        LoadOutcome::Pending(Box::pin(future))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LoadOutcome::Ready(_))
    }
}

impl<T: fmt::Debug> fmt::Debug for LoadOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            LoadOutcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Supplier of a value that may already be known or may complete later.
pub trait ResourceLoader<T>: Send {
    /// Starts the load. Called at most once per loader.
    fn load(self: Box<Self>) -> LoadOutcome<T>;
}

/// Pass-through loader for a value the caller already has.
#[derive(Debug, Clone)]
pub struct ProvidedLoader<T> {
    value: T,
}

impl<T> ProvidedLoader<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Send> ResourceLoader<T> for ProvidedLoader<T> {
    fn load(self: Box<Self>) -> LoadOutcome<T> {
        LoadOutcome::Ready(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provided_loader_is_ready() {
        let loader: Box<dyn ResourceLoader<u32>> = Box::new(ProvidedLoader::new(7));
        match loader.load() {
            LoadOutcome::Ready(v) => assert_eq!(v, 7),
            LoadOutcome::Pending(_) => panic!("Expected a synchronous value"),
        }
    }

    #[tokio::test]
    async fn test_pending_outcome_resolves() {
        let outcome = LoadOutcome::pending(async { Ok::<_, FrameworkError>(String::from("later")) });
        assert!(!outcome.is_ready());
        assert_eq!(format!("{:?}", outcome), "Pending(..)");
        if let LoadOutcome::Pending(fut) = outcome {
            assert_eq!(fut.await.unwrap(), "later");
        }
    }
}
