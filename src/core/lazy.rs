//! Single-flight asynchronous lazy initialisation
//!
//! [`SharedAsyncInit`] memoizes the outcome of one asynchronous factory run.
//! The first caller of [`SharedAsyncInit::get`] launches the factory as its own
//! task; every caller, past, concurrent or future, observes that one outcome.
//!
//! # Semantics
//!
//! - The factory runs at most once for the lifetime of the value.
//! - Failures are cached: once the factory has failed, every later `get`
//!   returns a clone of the same error without re-running the factory.
//! - A caller's cancellation only abandons that caller's wait. The factory keeps
//!   running for the remaining (and future) waiters. It is cancelled only when
//!   the `SharedAsyncInit` itself is dropped.
//!
//! ```text
//!   NotStarted ──get()──▶ InFlight ──factory Ok──▶ Completed(value)
//!                            │
//!                            └──factory Err/panic──▶ Failed(error)
//! ```

use crate::core::cancellation::{CancellationContext, Cancelled};
use crate::core::sync::lock_recovering;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Error used when the factory task ended without producing an outcome (it panicked)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("initialisation task ended without producing a value")]
pub struct InitAborted;

/// Factory producing the memoized value
///
/// The context handed to the factory belongs to the `SharedAsyncInit`, not to
/// any caller; it is cancelled only when the owner is dropped.
pub type InitFactory<T, E> =
    Box<dyn FnOnce(CancellationContext) -> BoxFuture<'static, Result<T, E>> + Send>;

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Observable phase of a [`SharedAsyncInit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    NotStarted,
    InFlight,
    Completed,
    Failed,
}

enum Slot<T, E> {
    NotStarted(InitFactory<T, E>),
    InFlight(SharedOutcome<T, E>),
    Completed(T),
    Failed(E),
}

/// Memoizing single-flight asynchronous initialiser
pub struct SharedAsyncInit<T, E> {
    slot: Mutex<Slot<T, E>>,
    factory_scope: CancellationContext,
}

impl<T, E> SharedAsyncInit<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<Cancelled> + From<InitAborted> + 'static,
{
    /// Wrap a factory without running it
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: FnOnce(CancellationContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let factory: InitFactory<T, E> = Box::new(move |ctx| factory(ctx).boxed());
        Self {
            slot: Mutex::new(Slot::NotStarted(factory)),
            factory_scope: CancellationContext::new(),
        }
    }

    /// Get the value, launching the factory on first access
    ///
    /// Returns `E::from(Cancelled)` if `ctx` is cancelled before the outcome is
    /// available; the factory itself keeps running.
    pub async fn get(&self, ctx: &CancellationContext) -> Result<T, E> {
        let outcome = {
            let mut slot = lock_recovering(&self.slot);
            match &*slot {
                Slot::Completed(value) => return Ok(value.clone()),
                Slot::Failed(error) => return Err(error.clone()),
                Slot::InFlight(outcome) => outcome.clone(),
                Slot::NotStarted(_) => self.launch(&mut slot),
            }
        };

        let result = match ctx.run_until_cancelled(outcome).await {
            Ok(result) => result,
            Err(cancelled) => return Err(E::from(cancelled)),
        };

        self.settle(&result);
        result
    }

    /// Peek at the value without launching or waiting for the factory
    pub fn get_if_ready(&self) -> Option<T> {
        match &*lock_recovering(&self.slot) {
            Slot::Completed(value) => Some(value.clone()),
            Slot::InFlight(outcome) => match outcome.peek() {
                Some(Ok(value)) => Some(value.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn state(&self) -> InitState {
        match &*lock_recovering(&self.slot) {
            Slot::NotStarted(_) => InitState::NotStarted,
            Slot::InFlight(outcome) => match outcome.peek() {
                None => InitState::InFlight,
                Some(Ok(_)) => InitState::Completed,
                Some(Err(_)) => InitState::Failed,
            },
            Slot::Completed(_) => InitState::Completed,
            Slot::Failed(_) => InitState::Failed,
        }
    }

    /// Spawn the factory and move the slot to `InFlight`
    ///
    /// Must be called with the slot lock held and the slot in `NotStarted`.
    fn launch(&self, slot: &mut Slot<T, E>) -> SharedOutcome<T, E> {
        let (tx, rx) = oneshot::channel::<Result<T, E>>();
        let outcome: SharedOutcome<T, E> = async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(E::from(InitAborted)),
            }
        }
        .boxed()
        .shared();

        let previous = std::mem::replace(slot, Slot::InFlight(outcome.clone()));
        if let Slot::NotStarted(factory) = previous {
            let scope = self.factory_scope.clone();
            tokio::spawn(async move {
                let result = factory(scope).await;
                // Every waiter may have gone away; the outcome is still
                // recorded through the shared future held by the slot.
                let _ = tx.send(result);
            });
        }

        outcome
    }

    fn settle(&self, result: &Result<T, E>) {
        let mut slot = lock_recovering(&self.slot);
        if matches!(*slot, Slot::InFlight(_)) {
            *slot = match result {
                Ok(value) => Slot::Completed(value.clone()),
                Err(error) => Slot::Failed(error.clone()),
            };
        }
    }
}

impl<T, E> Drop for SharedAsyncInit<T, E> {
    fn drop(&mut self) {
        self.factory_scope.cancel();
    }
}

impl<T, E> fmt::Debug for SharedAsyncInit<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*lock_recovering(&self.slot) {
            Slot::NotStarted(_) => "NotStarted",
            Slot::InFlight(_) => "InFlight",
            Slot::Completed(_) => "Completed",
            Slot::Failed(_) => "Failed",
        };
        f.debug_struct("SharedAsyncInit")
            .field("state", &state)
            .finish()
    }
}
