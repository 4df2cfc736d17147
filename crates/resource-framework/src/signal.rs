//! # Readiness Signals
//!
//! A [`Signal`] is a set-once flag that any number of tasks can wait on. The
//! writing half, [`Trigger`], moves it from `Pending` to either `Set` or
//! `Failed` exactly once; later calls are ignored.
//!
//! Two combinators build readiness barriers out of signals:
//!
//! - [`all_of`] resolves when every signal is set, or as soon as one fails.
//! - [`race_with_timer`] races any future against a timer without cancelling
//!   whatever the future was waiting on.
//!
//! ```rust
//! use resource_framework::signal::{self, all_of, race_with_timer, Race};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (config_ready, config) = signal::signal("configuration");
//!     let (user_ready, user) = signal::signal("identity");
//!
//!     config_ready.set();
//!     user_ready.set();
//!
//!     let outcome = race_with_timer(all_of(&[config, user]), Duration::from_millis(10)).await;
//!     assert!(matches!(outcome, Race::Completed(Ok(()))));
//! }
//! ```

use crate::error::FrameworkError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::debug;

/// State of a readiness signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalState {
    Pending,
    Set,
    Failed(String),
}

/// Writing half of a signal. Cloneable; the signal only counts as dropped once
/// every clone is gone.
#[derive(Debug, Clone)]
pub struct Trigger {
    name: &'static str,
    sender: Arc<watch::Sender<SignalState>>,
}

/// Reading half of a signal.
#[derive(Debug, Clone)]
pub struct Signal {
    name: &'static str,
    receiver: watch::Receiver<SignalState>,
}

/// Creates a named, pending signal.
pub fn signal(name: &'static str) -> (Trigger, Signal) {
    let (sender, receiver) = watch::channel(SignalState::Pending);
    (
        Trigger {
            name,
            sender: Arc::new(sender),
        },
        Signal { name, receiver },
    )
}

impl Trigger {
    /// Marks the signal as set. Returns `true` only for the call that did it.
    pub fn set(&self) -> bool {
        self.transition(SignalState::Set)
    }

    /// Marks the signal as failed. Returns `true` only for the call that did it.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.transition(SignalState::Failed(reason.into()))
    }

    pub fn is_set(&self) -> bool {
        *self.sender.borrow() == SignalState::Set
    }

    /// Returns a new reading half for this signal.
    pub fn signal(&self) -> Signal {
        Signal {
            name: self.name,
            receiver: self.sender.subscribe(),
        }
    }

    fn transition(&self, next: SignalState) -> bool {
        let name = self.name;
        self.sender.send_if_modified(|state| {
            if *state != SignalState::Pending {
                return false;
            }
            debug!(signal = name, state = ?next, "Signal resolved");
            *state = next;
            true
        })
    }
}

impl Signal {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> SignalState {
        self.receiver.borrow().clone()
    }

    pub fn is_set(&self) -> bool {
        *self.receiver.borrow() == SignalState::Set
    }

    /// Waits until the signal leaves `Pending`.
    pub async fn wait(&self) -> Result<(), FrameworkError> {
        let mut receiver = self.receiver.clone();
        let result = match receiver.wait_for(|s| *s != SignalState::Pending).await {
            Ok(state) => settled(&state),
            Err(_) => Err(FrameworkError::SignalDropped),
        };
        result
    }
}

fn settled(state: &SignalState) -> Result<(), FrameworkError> {
    match state {
        SignalState::Set => Ok(()),
        SignalState::Failed(reason) => Err(FrameworkError::SignalFailed(reason.clone())),
        SignalState::Pending => Err(FrameworkError::SignalDropped),
    }
}

/// Barrier over independently completing signals.
///
/// Resolves `Ok(())` once every signal is set and `Err` as soon as any of them
/// fails. Signals that are already settled are checked without yielding, so a
/// barrier whose inputs are all set completes on its first poll.
pub async fn all_of(signals: &[Signal]) -> Result<(), FrameworkError> {
    let mut outstanding = JoinSet::new();
    for signal in signals {
        match signal.state() {
            SignalState::Set => {}
            SignalState::Failed(reason) => return Err(FrameworkError::SignalFailed(reason)),
            SignalState::Pending => {
                let signal = signal.clone();
                outstanding.spawn(async move { signal.wait().await });
            }
        }
    }

    while let Some(joined) = outstanding.join_next().await {
        joined.map_err(|_| FrameworkError::SignalDropped)??;
    }
    Ok(())
}

/// Outcome of [`race_with_timer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Race<T> {
    Completed(T),
    TimedOut,
}

/// Races `future` against a timer of `after`.
///
/// The future is polled before the timer, so a future that is already complete
/// wins even with a zero duration. Losing only drops this caller's interest; the
/// signals the future was waiting on are unaffected.
pub async fn race_with_timer<F: Future>(future: F, after: Duration) -> Race<F::Output> {
    match tokio::time::timeout(after, future).await {
        Ok(output) => Race::Completed(output),
        Err(_) => Race::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_sets_once() {
        let (trigger, signal) = signal("config");
        assert_eq!(signal.state(), SignalState::Pending);

        assert!(trigger.set());
        assert!(!trigger.set());
        assert!(!trigger.fail("too late"));
        assert!(signal.is_set());
        assert!(trigger.is_set());
        assert_eq!(signal.name(), "config");
    }

    #[tokio::test]
    async fn test_wait_sees_failure() {
        let (trigger, signal) = signal("config");
        trigger.fail("no datafile");
        assert_eq!(
            signal.wait().await,
            Err(FrameworkError::SignalFailed("no datafile".into()))
        );
    }

    #[tokio::test]
    async fn test_dropped_trigger_is_reported() {
        let (trigger, signal) = signal("identity");
        drop(trigger);
        assert_eq!(signal.wait().await, Err(FrameworkError::SignalDropped));
    }

    #[tokio::test]
    async fn test_all_of_waits_for_every_signal() {
        let (a_trigger, a) = signal("a");
        let (b_trigger, b) = signal("b");

        let barrier = tokio::spawn(async move { all_of(&[a, b]).await });

        a_trigger.set();
        tokio::task::yield_now().await;
        assert!(!barrier.is_finished());

        b_trigger.set();
        assert_eq!(barrier.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_all_of_fails_fast() {
        let (_a_trigger, a) = signal("a");
        let (b_trigger, b) = signal("b");

        let barrier = tokio::spawn(async move { all_of(&[a, b]).await });
        b_trigger.fail("fetch failed");

        assert_eq!(
            barrier.await.unwrap(),
            Err(FrameworkError::SignalFailed("fetch failed".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_with_zero_timer_prefers_completed_future() {
        let (trigger, signal) = signal("a");
        trigger.set();

        let outcome = race_with_timer(all_of(&[signal]), Duration::ZERO).await;
        assert_eq!(outcome, Race::Completed(Ok(())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_times_out_without_cancelling_signal() {
        let (trigger, signal) = signal("a");

        let outcome = race_with_timer(all_of(&[signal.clone()]), Duration::from_millis(50)).await;
        assert_eq!(outcome, Race::TimedOut);

        trigger.set();
        let outcome = race_with_timer(all_of(&[signal]), Duration::from_millis(50)).await;
        assert_eq!(outcome, Race::Completed(Ok(())));
    }
}
