//! Per-callback synchronous handoff
//!
//! A driver thread that submits a callback blocks on a [`Waiter`] until the
//! host domain has executed the callback and completed the matching
//! [`Signal`]. Both halves are consumed by value, so a handoff can be
//! signaled at most once and waited on at most once.
//!
//! A `Signal` dropped without being completed (the host discarded the task,
//! or the dispatcher could not schedule it) wakes the waiter with
//! [`Error::Abandoned`](crate::Error::Abandoned) instead of leaving it blocked.

use crate::error::{Error, Result};
use crate::execution::Fault;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How a callback ended
#[derive(Debug)]
enum Completion<R> {
    Value(R),
    Fault(Fault),
    Abandoned,
}

#[derive(Debug)]
struct Shared<R> {
    /// `None` until handled
    slot: Mutex<Option<Completion<R>>>,
    cond: Condvar,
}

impl<R> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, Option<Completion<R>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, completion: Completion<R>) {
        let mut slot = self.lock();
        *slot = Some(completion);
        self.cond.notify_one();
    }
}

/// Create a connected signal/waiter pair for one callback
pub fn channel<R>() -> (Signal<R>, Waiter<R>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        cond: Condvar::new(),
    });
    (
        Signal {
            shared: Some(Arc::clone(&shared)),
        },
        Waiter { shared },
    )
}

/// Host-side half: completed exactly once after the callback ran
#[derive(Debug)]
pub struct Signal<R> {
    shared: Option<Arc<Shared<R>>>,
}

impl<R> Signal<R> {
    /// Record the callback outcome and wake the waiting driver thread
    pub fn signal(mut self, outcome: std::result::Result<R, Fault>) {
        if let Some(shared) = self.shared.take() {
            shared.complete(match outcome {
                Ok(value) => Completion::Value(value),
                Err(fault) => Completion::Fault(fault),
            });
        }
    }
}

impl<R> Drop for Signal<R> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.complete(Completion::Abandoned);
        }
    }
}

/// Driver-side half: blocks until the host has handled the callback
#[derive(Debug)]
pub struct Waiter<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Waiter<R> {
    /// Block until the callback has been handled and return its result
    pub fn wait(self) -> Result<R> {
        let guard = self
            .shared
            .cond
            .wait_while(self.shared.lock(), |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        Self::finish(guard)
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`
    pub fn wait_timeout(self, timeout: Duration) -> Result<R> {
        let (guard, result) = self
            .shared
            .cond
            .wait_timeout_while(self.shared.lock(), timeout, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && guard.is_none() {
            return Err(Error::Timeout(timeout));
        }
        Self::finish(guard)
    }

    fn finish(mut guard: MutexGuard<'_, Option<Completion<R>>>) -> Result<R> {
        match guard.take() {
            Some(Completion::Value(value)) => Ok(value),
            Some(Completion::Fault(fault)) => Err(Error::Fault(fault.message)),
            Some(Completion::Abandoned) | None => Err(Error::Abandoned),
        }
    }
}
