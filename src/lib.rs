//! # Decision Client
//!
//! > **Feature flags and experiments for clients that start before they know everything.**
//!
//! A decision engine can only answer "which variation does this user get?" once
//! it has a datafile and knows who the user is. On a real client both arrive
//! late and in no particular order: the datafile comes from the network (or a
//! durable cache), the user from a login flow. This crate wraps the engine so the
//! application can start asking questions immediately.
//!
//! ## Core Concepts
//!
//! ### Two dependencies, one readiness
//! The client is ready once it has a datafile *and* an identity. Side-effecting
//! calls made earlier (`activate`, `track`) are queued and replayed in order;
//! read-only queries return safe defaults. [`DecisionClient::on_ready`] lets a
//! caller wait for readiness with a timeout of its own.
//!
//! ### Default user, per-call overrides
//! [`DecisionClient::set_identity`] stores the default user. Any query can name a
//! different user with a [`UserOverride`]; the override is used exactly as given
//! and never merged with the default. See [`model::resolve_user`].
//!
//! ### Cached datafiles
//! With an SDK key or URL the datafile is fetched over HTTP and written to a
//! [`KeyValueStore`](datafile::KeyValueStore). The next client starts from the
//! cached copy and swaps in the fresh one when it arrives.
//!
//! ## Module Tour
//!
//! - [`client`]: the readiness state machine and every public query
//! - [`datafile`]: fetch, cache and the loader combining them
//! - [`model`]: datafile, identity and variable types, plus the precedence rules
//! - [`engine`]: the [`DecisionEngine`] seam
//! - [`config`]: [`ClientConfig`] and its defaults
//! - [`mock`]: test doubles for the engine, fetcher and clock
//!
//! Generic building blocks (loaders, cached resources, readiness signals, the
//! update broker) live in the `resource-framework` crate.
//!
//! ## Quick Start
//!
//! ```rust
//! use decision_client::mock::MockEngine;
//! use decision_client::{ClientConfig, DecisionClient, UserOverride};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = MockEngine::new().with_enabled_feature("new_checkout");
//!     let client = DecisionClient::builder(ClientConfig::with_datafile(json!({"revision": "1"})), engine.factory())
//!         .build()
//!         .expect("datafile supplied");
//!
//!     // Not ready yet: tracked, but only delivered later
//!     client.track("page_view", None, None);
//!
//!     client.set_user("user_1", None);
//!     let ready = client.on_ready(Some(Duration::from_secs(1))).await;
//!     assert!(ready.success);
//!
//!     assert!(client.is_feature_enabled("new_checkout", None));
//!     assert!(client.is_feature_enabled("new_checkout", Some(UserOverride::new("user_2"))));
//!     assert_eq!(engine.tracked_events(), vec!["page_view"]);
//! }
//! ```
//!
//! ### Running Tests
//!
//! ```bash
//! RUST_LOG=debug cargo test
//! ```

pub mod client;
pub mod config;
pub mod datafile;
pub mod engine;
pub mod error;
pub mod mock;
pub mod model;

pub use client::{DecisionClient, DecisionClientBuilder, OnReadyResult, PendingCall, ReadinessState};
pub use config::{ClientConfig, StaleCachePolicy};
pub use engine::{DecisionEngine, EngineFactory, EventTags};
pub use error::{ClientError, DatafileError, StorageError};
pub use model::{
    resolve_user, CacheEntry, Datafile, Identity, IdentityUpdate, ResolvedUser, UserAttributes, UserOverride,
    VariableSpec, VariableType, VariableValue,
};
pub use resource_framework::tracing::{setup_tracing, try_setup_tracing};
