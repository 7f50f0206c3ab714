//! Cooperative cancellation signal.
//!
//! A `CancellationSignal` is a cheaply cloneable handle to one shared state
//! that moves exactly once from active to cancelled. Every clone observes the
//! same transition. Waiting is event-driven through a `tokio::sync::watch`
//! channel, so readers never poll a flag.
//!
//! An optional deadline makes the signal cancel itself once it elapses.
//! Control flow treats both causes the same way, but the recorded
//! [`CancelReason`] keeps them apart so callers can report `Cancelled` versus
//! `DeadlineExceeded`.
//!
//! ```ignore
//! let signal = CancellationSignal::with_timeout(Duration::from_secs(5));
//! let child = signal.child();
//!
//! tokio::spawn({
//!     let child = child.clone();
//!     async move {
//!         let reason = child.cancelled().await;
//!         tracing::info!(?reason, "stopping");
//!     }
//! });
//!
//! signal.cancel(); // child observes it too
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{EngineError, EngineResult};

/// Why a signal left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel()` was called on this signal or an ancestor.
    Explicit,
    /// The signal's (or an ancestor's) deadline elapsed.
    DeadlineExceeded,
}

impl From<CancelReason> for EngineError {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Explicit => EngineError::Cancelled,
            CancelReason::DeadlineExceeded => EngineError::DeadlineExceeded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalState {
    Active,
    Cancelled(CancelReason),
}

impl SignalState {
    fn reason(self) -> Option<CancelReason> {
        match self {
            SignalState::Active => None,
            SignalState::Cancelled(reason) => Some(reason),
        }
    }
}

struct SignalInner {
    state: watch::Sender<SignalState>,
    deadline: Option<Instant>,
    parent: Option<CancellationSignal>,
}

/// Broadcast, idempotent stop notification with an optional deadline.
#[derive(Clone)]
pub struct CancellationSignal {
    inner: Arc<SignalInner>,
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("state", &*self.inner.state.borrow())
            .field("deadline", &self.inner.deadline)
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSignal {
    /// Active signal without a deadline.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Active signal that cancels itself at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline), None)
    }

    /// Active signal that cancels itself `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    fn build(deadline: Option<Instant>, parent: Option<CancellationSignal>) -> Self {
        let (state, _) = watch::channel(SignalState::Active);
        Self {
            inner: Arc::new(SignalInner {
                state,
                deadline,
                parent,
            }),
        }
    }

    /// Derive a signal that is cancelled whenever this one is.
    ///
    /// Cancelling the child does not affect the parent. The child inherits
    /// the parent's deadline.
    pub fn child(&self) -> Self {
        Self::build(self.inner.deadline, Some(self.clone()))
    }

    /// Like [`child`](Self::child), with a deadline `timeout` from now.
    /// The effective deadline is the earlier of the two; it never loosens.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.inner.deadline {
            Some(parent) => parent.min(own),
            None => own,
        };
        Self::build(Some(deadline), Some(self.clone()))
    }

    /// Absolute time after which the signal cancels itself.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Cancel the signal.
    ///
    /// Idempotent. Returns `true` only for the call that performed the
    /// transition; later calls (or calls after the deadline fired) return
    /// `false`.
    pub fn cancel(&self) -> bool {
        let transitioned = self.transition(CancelReason::Explicit);
        if transitioned {
            tracing::debug!("cancellation signal fired");
        }
        transitioned
    }

    fn transition(&self, reason: CancelReason) -> bool {
        self.inner.state.send_if_modified(|state| match state {
            SignalState::Active => {
                *state = SignalState::Cancelled(reason);
                true
            }
            SignalState::Cancelled(_) => false,
        })
    }

    fn stored_reason(&self) -> Option<CancelReason> {
        self.inner.state.borrow().reason()
    }

    /// Current cancellation reason, if any.
    ///
    /// Folds in an elapsed deadline or a cancelled ancestor, so a reader
    /// never sees "active" after either has happened.
    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = self.stored_reason() {
            return Some(reason);
        }

        if let Some(parent_reason) = self.inner.parent.as_ref().and_then(|p| p.reason()) {
            self.transition(parent_reason);
        } else if self
            .inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            self.transition(CancelReason::DeadlineExceeded);
        }

        self.stored_reason()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// `Ok(())` while active, otherwise the error matching the reason.
    pub fn check(&self) -> EngineResult<()> {
        match self.reason() {
            None => Ok(()),
            Some(reason) => Err(reason.into()),
        }
    }

    /// Wait until the signal is cancelled and return why.
    ///
    /// Resolves immediately when already cancelled. Cancel safe.
    ///
    /// Each call allocates one boxed future and arms one timer per deadline
    /// in the ancestor chain. Loops that wait repeatedly should pin a single
    /// `cancelled()` future and poll it by `&mut` instead of calling this per
    /// iteration.
    pub async fn cancelled(&self) -> CancelReason {
        self.wait_cancelled().await
    }

    fn wait_cancelled(&self) -> BoxFuture<'_, CancelReason> {
        async move {
            if let Some(reason) = self.reason() {
                return reason;
            }

            let mut rx = self.inner.state.subscribe();
            let explicit = async move {
                loop {
                    if let Some(reason) = rx.borrow_and_update().reason() {
                        return reason;
                    }
                    if rx.changed().await.is_err() {
                        // Sender lives as long as `self`; unreachable in practice.
                        std::future::pending::<()>().await;
                    }
                }
            };

            let parent = async {
                match &self.inner.parent {
                    Some(parent) => parent.wait_cancelled().await,
                    None => std::future::pending().await,
                }
            };

            let deadline = self.inner.deadline;
            let expiry = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let observed = tokio::select! {
                biased;
                reason = explicit => return reason,
                reason = parent => reason,
                _ = expiry => CancelReason::DeadlineExceeded,
            };

            self.transition(observed);
            self.stored_reason().unwrap_or(observed)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let signal = CancellationSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.check().is_ok());

        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(!signal.cancel());

        assert_eq!(signal.reason(), Some(CancelReason::Explicit));
        assert!(matches!(signal.check(), Err(EngineError::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancel_single_transition() {
        let signal = CancellationSignal::new();

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.cancelled().await })
            })
            .collect();

        let cancellers: Vec<_> = (0..16)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.cancel() })
            })
            .collect();

        let mut transitions = 0;
        for handle in cancellers {
            if handle.await.unwrap() {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);

        for waiter in waiters {
            let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should unblock")
                .unwrap();
            assert_eq!(reason, CancelReason::Explicit);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reported_distinctly() {
        let signal = CancellationSignal::with_timeout(Duration::from_millis(50));
        assert!(signal.deadline().is_some());
        assert!(!signal.is_cancelled());

        let reason = signal.cancelled().await;
        assert_eq!(reason, CancelReason::DeadlineExceeded);
        assert!(matches!(signal.check(), Err(EngineError::DeadlineExceeded)));

        // Explicit cancel after the deadline does not rewrite the reason.
        assert!(!signal.cancel());
        assert_eq!(signal.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_observed_without_waiting() {
        let signal = CancellationSignal::with_timeout(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(signal.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let parent = CancellationSignal::new();
        let child = parent.child();

        let waiter = tokio::spawn({
            let child = child.clone();
            async move { child.cancelled().await }
        });

        parent.cancel();
        assert_eq!(waiter.await.unwrap(), CancelReason::Explicit);
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_affect_parent() {
        let parent = CancellationSignal::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_timeout_never_loosens() {
        let parent = CancellationSignal::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let reason = child.cancelled().await;
        assert_eq!(reason, CancelReason::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_pinned_wait_survives_repeated_selects() {
        let parent = CancellationSignal::new();
        let signal = parent.child();
        let cancelled = signal.cancelled();
        tokio::pin!(cancelled);

        for _ in 0..5 {
            tokio::select! {
                biased;
                _ = &mut cancelled => panic!("signal is still active"),
                _ = tokio::task::yield_now() => {}
            }
        }

        parent.cancel();
        let reason = tokio::time::timeout(Duration::from_secs(1), &mut cancelled)
            .await
            .unwrap();
        assert_eq!(reason, CancelReason::Explicit);
    }
}
