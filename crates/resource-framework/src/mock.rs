//! # Mock Loader & Testing Guide
//!
//! Loaders usually hide a network request or a disk read, which makes timing-sensitive
//! code awkward to test. [`MockLoader`] replaces that with a value the test completes
//! by hand, at exactly the moment it wants.
//!
//! ## When to use which loader
//!
//! | Loader | Completes | Use Case |
//! |--------|-----------|----------|
//! | [`ProvidedLoader`](crate::ProvidedLoader) | Synchronously, at `load()` | Value known up front |
//! | [`MockLoader::ready`] | Synchronously, counts calls | Asserting the loader ran exactly once |
//! | [`MockLoader::new`] | When the test calls [`MockLoaderHandle::complete`] | Ordering and timeout tests |
//!
//! ## Example
//!
//! ```rust
//! use resource_framework::mock::MockLoader;
//! use resource_framework::CachedResource;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (loader, handle) = MockLoader::<u32>::new();
//!     let resource = CachedResource::new(Box::new(loader));
//!     assert!(!resource.has_loaded());
//!
//!     handle.complete(Ok(5));
//!     assert_eq!(resource.wait().await, Ok(5));
//!     assert_eq!(handle.load_count(), 1);
//! }
//! ```
//!
//! ## Simulating Failures
//!
//! Complete with an error to exercise the failure path, or drop the handle to
//! simulate a loader task that disappeared:
//!
//! ```rust
//! use resource_framework::mock::MockLoader;
//! use resource_framework::{CachedResource, FrameworkError};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (loader, handle) = MockLoader::<u32>::new();
//!     let resource = CachedResource::new(Box::new(loader));
//!
//!     drop(handle);
//!     assert_eq!(resource.wait().await, Err(FrameworkError::Abandoned));
//! }
//! ```

use crate::error::FrameworkError;
use crate::loader::{LoadOutcome, ResourceLoader};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

type Completion<T> = oneshot::Sender<Result<T, FrameworkError>>;

enum Script<T> {
    Ready(T),
    Pending(oneshot::Receiver<Result<T, FrameworkError>>),
}

/// A loader whose result is controlled by the test.
pub struct MockLoader<T> {
    script: Script<T>,
    loads: Arc<AtomicUsize>,
}

/// Test-side handle for a [`MockLoader`].
pub struct MockLoaderHandle<T> {
    completion: Mutex<Option<Completion<T>>>,
    loads: Arc<AtomicUsize>,
}

impl<T> MockLoader<T> {
    /// Creates a loader that stays pending until [`MockLoaderHandle::complete`].
    pub fn new() -> (Self, MockLoaderHandle<T>) {
        let (sender, receiver) = oneshot::channel();
        let loads = Arc::new(AtomicUsize::new(0));
        (
            Self {
                script: Script::Pending(receiver),
                loads: loads.clone(),
            },
            MockLoaderHandle {
                completion: Mutex::new(Some(sender)),
                loads,
            },
        )
    }

    /// Creates a loader that returns `value` synchronously.
    pub fn ready(value: T) -> (Self, MockLoaderHandle<T>) {
        let loads = Arc::new(AtomicUsize::new(0));
        (
            Self {
                script: Script::Ready(value),
                loads: loads.clone(),
            },
            MockLoaderHandle {
                completion: Mutex::new(None),
                loads,
            },
        )
    }
}

impl<T: Send + 'static> ResourceLoader<T> for MockLoader<T> {
    fn load(self: Box<Self>) -> LoadOutcome<T> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Ready(value) => LoadOutcome::Ready(value),
            Script::Pending(receiver) => LoadOutcome::pending(async move {
                match receiver.await {
                    Ok(result) => result,
                    Err(_) => Err(FrameworkError::Abandoned),
                }
            }),
        }
    }
}

impl<T> MockLoaderHandle<T> {
    /// Completes the pending load. Panics if called twice or on a ready loader.
    pub fn complete(&self, result: Result<T, FrameworkError>) {
        let sender = self
            .completion
            .lock()
            .unwrap()
            .take()
            .expect("MockLoader already completed");
        let _ = sender.send(result);
    }

    /// Number of times `load` was invoked.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}
