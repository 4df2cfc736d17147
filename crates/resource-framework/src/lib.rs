//! # Resource Framework
//!
//! Domain-free building blocks for clients that must cope with values arriving
//! late: a configuration document that is still downloading, a user who has not
//! signed in yet, a cache that may or may not hold something useful.
//!
//! ## Architecture Overview
//!
//! The crate separates concerns into four small pieces:
//!
//! 1. **Supply** ([`ResourceLoader`]) - something that can produce a value, now or later
//! 2. **Memoization** ([`CachedResource`]) - runs a loader once and lets anyone observe the result
//! 3. **Coordination** ([`signal`]) - set-once signals, an `all_of` barrier and a timer race
//! 4. **Fan-out** ([`UpdateBroker`]) - ordered, re-entrancy-safe listener lists
//!
//! Domain crates provide loaders and wire these pieces together; none of them know
//! what the loaded value means.
//!
//! ## Quick Tour
//!
//! ```rust
//! use resource_framework::{CachedResource, ProvidedLoader, UpdateBroker};
//! use resource_framework::signal::{self, all_of, race_with_timer, Race};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     // 1. A value that is already known loads synchronously
//!     let settings = CachedResource::new(Box::new(ProvidedLoader::new("v1".to_string())));
//!     assert!(settings.has_loaded());
//!
//!     // 2. Readiness gates on two independent signals
//!     let (loaded, loaded_signal) = signal::signal("settings");
//!     let (signed_in, signed_in_signal) = signal::signal("user");
//!     loaded.set();
//!
//!     let early = race_with_timer(
//!         all_of(&[loaded_signal.clone(), signed_in_signal.clone()]),
//!         Duration::from_millis(5),
//!     )
//!     .await;
//!     assert_eq!(early, Race::TimedOut);
//!
//!     signed_in.set();
//!     let late = race_with_timer(all_of(&[loaded_signal, signed_in_signal]), Duration::from_millis(5)).await;
//!     assert_eq!(late, Race::Completed(Ok(())));
//!
//!     // 3. Listeners hear about changes in registration order
//!     let broker = UpdateBroker::<String>::new();
//!     let subscription = broker.register(|name| println!("user is now {}", name));
//!     broker.notify(&"alice".to_string());
//!     subscription.dispose();
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! - Shared state lives in `tokio::sync::watch` channels or short `std::sync::Mutex`
//!   critical sections; no lock is held across an `.await` or a callback
//! - A pending load runs on its own Tokio task, so constructors never block
//! - Timers only stop a caller from waiting; they never cancel the thing waited on
//!
//! ## Testing
//!
//! See the [`mock`] module for a loader the test completes by hand.

pub mod broker;
pub mod error;
pub mod loader;
pub mod mock;
pub mod resource;
pub mod signal;
pub mod tracing;

// Re-export core types for convenience
pub use broker::{Subscription, UpdateBroker};
pub use error::FrameworkError;
pub use loader::{BoxFuture, LoadOutcome, ProvidedLoader, ResourceLoader};
pub use resource::{CachedResource, ResourceState};
pub use signal::{all_of, race_with_timer, Race, Signal, SignalState, Trigger};
