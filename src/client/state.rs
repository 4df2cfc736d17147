//! Mutable state of a client and the values it reports about readiness.

use crate::engine::{DecisionEngine, EventTags};
use crate::model::{Datafile, Identity, UserOverride};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Readiness as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// Neither the datafile nor an identity is available.
    Uninitialized,
    /// One of the two is available, or queued calls are still being replayed.
    Waiting,
    Ready,
    /// `close()` was called. Queries degrade as if not ready.
    Closed,
    /// One `on_ready` call gave up. Never a state of the client itself.
    TimedOut,
}

/// Outcome of one [`DecisionClient::on_ready`](crate::DecisionClient::on_ready) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnReadyResult {
    pub success: bool,
    pub reason: Option<String>,
}

impl OnReadyResult {
    pub(crate) fn ready() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    pub(crate) fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }

    /// `Ready` on success, `TimedOut` otherwise.
    pub fn state(&self) -> ReadinessState {
        if self.success {
            ReadinessState::Ready
        } else {
            ReadinessState::TimedOut
        }
    }
}

/// A side-effecting call made before the client was ready.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingCall {
    Activate {
        experiment_key: String,
        user: Option<UserOverride>,
    },
    Track {
        event_key: String,
        user: Option<UserOverride>,
        tags: Option<EventTags>,
    },
}

impl PendingCall {
    pub fn operation(&self) -> &'static str {
        match self {
            PendingCall::Activate { .. } => "activate",
            PendingCall::Track { .. } => "track",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            PendingCall::Activate { experiment_key, .. } => experiment_key,
            PendingCall::Track { event_key, .. } => event_key,
        }
    }
}

/// Everything behind the client's lock.
///
/// `ready` flips to `true` only after the pending queue has been drained, so a
/// call that sees `ready == false` must queue or degrade.
#[derive(Default)]
pub(crate) struct ClientState {
    pub identity: Identity,
    pub identity_set: bool,
    pub datafile: Option<Arc<Datafile>>,
    pub engine: Option<Arc<dyn DecisionEngine>>,
    pub ready: bool,
    pub draining: bool,
    pub closed: bool,
    pub pending: VecDeque<PendingCall>,
}

impl ClientState {
    pub fn readiness(&self) -> ReadinessState {
        if self.closed {
            return ReadinessState::Closed;
        }
        if self.ready {
            return ReadinessState::Ready;
        }
        match (self.engine.is_some(), self.identity_set) {
            (false, false) => ReadinessState::Uninitialized,
            _ => ReadinessState::Waiting,
        }
    }

    /// Both dependencies are in and nobody has started draining yet.
    pub fn can_become_ready(&self) -> bool {
        !self.ready && !self.draining && !self.closed && self.engine.is_some() && self.identity_set
    }
}

impl fmt::Debug for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientState")
            .field("identity", &self.identity)
            .field("revision", &self.datafile.as_ref().and_then(|d| d.revision()))
            .field("ready", &self.ready)
            .field("closed", &self.closed)
            .field("pending", &self.pending.len())
            .finish()
    }
}
