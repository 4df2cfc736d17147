//! # Framework Errors
//!
//! This module defines the common error types used by the loading and readiness
//! primitives. Domain crates wrap their own failures into [`FrameworkError::LoadFailed`]
//! so that every waiter on a resource sees the same message.

/// Errors that can occur within the resource framework itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameworkError {
    /// The loader reported a failure. The message is shared by all waiters.
    #[error("Load failed: {0}")]
    LoadFailed(String),
    /// The task driving a pending load went away without producing a value.
    #[error("Loader abandoned before producing a value")]
    Abandoned,
    /// A readiness signal was marked as failed.
    #[error("Signal failed: {0}")]
    SignalFailed(String),
    /// Every trigger for a signal was dropped while it was still pending.
    #[error("Signal dropped before it was set")]
    SignalDropped,
}

impl FrameworkError {
    /// Wraps any displayable error as a load failure.
    pub fn load_failed(e: impl std::fmt::Display) -> Self {
        FrameworkError::LoadFailed(e.to_string())
    }
}
