//! # Observability & Tracing
//!
//! Every component logs through the `tracing` macros with structured fields
//! (`resource_type`, `signal`, `operation`, ...). Nothing in the workspace holds a
//! global logger object: installing a subscriber is the one place where output
//! is configured.
//!
//! ```bash
//! # Readiness transitions and skipped decisions
//! RUST_LOG=info cargo test
//!
//! # Signal resolution, cache hits and replayed calls
//! RUST_LOG=debug cargo test
//!
//! # Only the client
//! RUST_LOG=decision_client=debug cargo test
//! ```

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}

/// Like [`setup_tracing`], but does nothing if a subscriber is already set.
/// Handy in tests, where many cases share one process.
pub fn try_setup_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_test_writer()
        .try_init()
        .is_ok()
}
