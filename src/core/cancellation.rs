//! Linked cancellation scopes
//!
//! A `CancellationContext` wraps a [`CancellationToken`]. Scopes form a tree:
//! cancelling a scope cancels every scope derived from it with
//! [`CancellationContext::child`], never the other way round.

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Marker error returned when a wait was abandoned because its scope was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Handle onto a (possibly linked) cancellation scope
#[derive(Debug, Clone, Default)]
pub struct CancellationContext {
    token: CancellationToken,
}

impl CancellationContext {
    /// Create a new root scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a scope that is cancelled together with `self`
    ///
    /// The child can also be cancelled on its own without affecting `self`.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Cancel this scope and every scope derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until this scope is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Drive `future` to completion unless this scope is cancelled first
    pub async fn run_until_cancelled<F>(&self, future: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        self.token.run_until_cancelled(future).await.ok_or(Cancelled)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl From<CancellationToken> for CancellationContext {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}
