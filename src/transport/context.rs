use crate::EchoError;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Establishment (interceptors, TCP connect, call setup) still running
    Connecting,
    /// Both directions are open
    Open,
    /// Writes were closed; responses may still arrive
    WriteHalfClosed,
    /// Writes closed and the read side observed end of stream
    Closed,
    /// Establishment or the transport failed, or the call was cancelled
    Failed,
}

impl CallState {
    /// `Closed` and `Failed` never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Closed | CallState::Failed)
    }
}

/// Shared state of one call
///
/// Holds the current [`CallState`], the first failure recorded for the call
/// and the cancellation token every background task of the call listens to.
/// Clones refer to the same call.
#[derive(Debug, Clone)]
pub struct CallContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: watch::Sender<CallState>,
    failure: Mutex<Option<EchoError>>,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new() -> Self {
        let (state, _) = watch::channel(CallState::Connecting);
        Self {
            inner: Arc::new(Inner {
                state,
                failure: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> CallState {
        *self.inner.state.borrow()
    }

    /// Moves the call to `next`. Terminal states are never left.
    pub fn transition(&self, next: CallState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next;
            true
        })
    }

    /// Records `err` as the reason the call failed and moves it to `Failed`.
    ///
    /// The first failure wins and is returned to every later caller. A call
    /// that already closed cleanly stays closed.
    pub fn fail(&self, err: EchoError) -> EchoError {
        let mut failure = self
            .inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = failure.as_ref() {
            return existing.clone();
        }

        let mut recorded = false;
        self.inner.state.send_if_modified(|state| {
            if *state == CallState::Closed {
                return false;
            }
            *state = CallState::Failed;
            recorded = true;
            true
        });
        if recorded {
            *failure = Some(err.clone());
        }
        err
    }

    pub fn failure(&self) -> Option<EchoError> {
        self.inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fails the call with [`EchoError::Cancelled`] and tears down its tasks
    pub fn cancel(&self) {
        self.fail(EchoError::Cancelled);
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Token cancelled when the call is cancelled; used for per-connection teardown
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    /// Resolves once the call failed or was cancelled
    pub async fn failed(&self) -> EchoError {
        let mut state = self.inner.state.subscribe();
        tokio::select! {
            _ = state.wait_for(|state| *state == CallState::Failed) => {}
            _ = self.inner.cancel.cancelled() => {}
        }
        self.failure().unwrap_or(EchoError::Cancelled)
    }

    /// Resolves with the first state matching `predicate`
    pub async fn wait_for(&self, mut predicate: impl FnMut(&CallState) -> bool) -> CallState {
        let mut state = self.inner.state.subscribe();
        let reached = state.wait_for(|s| predicate(s)).await.map(|s| *s);
        reached.unwrap_or_else(|_| self.state())
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
