//! Callback queue
//!
//! FIFO of pending units shared by every driver thread (producers) and the
//! dispatcher (single consumer). The queue contents and the abort flag live
//! behind one mutex; a condition variable wakes the dispatcher on every push
//! and on abort.
//!
//! Shutdown drains: after [`abort`](CallbackQueue::abort), the dispatcher
//! keeps receiving queued units until the queue is empty, at which point the
//! queue closes under the same lock. Pushes after that are handed back as
//! [`Rejected`] so a late submitter fails fast rather than waiting forever.

use crate::unit::PendingUnit;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct QueueState {
    units: VecDeque<PendingUnit>,
    abort: bool,
    closed: bool,
}

/// What the dispatcher should do next
#[derive(Debug)]
pub enum Next {
    /// Oldest queued unit
    Unit(PendingUnit),
    /// Abort was requested and the queue is drained
    Stop,
}

/// A unit handed back because the queue has closed
#[derive(Debug)]
pub struct Rejected(pub PendingUnit);

/// Mutex-protected FIFO of pending callbacks
#[derive(Debug)]
pub struct CallbackQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    warn_depth: usize,
}

impl CallbackQueue {
    /// Create an empty queue that warns when its backlog exceeds `warn_depth`
    pub fn new(warn_depth: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
            warn_depth,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a unit and wake the dispatcher
    ///
    /// Only fails once the dispatcher has drained the queue and stopped.
    pub fn push(&self, unit: PendingUnit) -> Result<(), Rejected> {
        let mut state = self.lock();
        if state.closed {
            return Err(Rejected(unit));
        }
        trace!(unit = %unit.id, "Queueing callback");
        state.units.push_back(unit);
        let depth = state.units.len();
        self.ready.notify_one();
        drop(state);

        if depth > self.warn_depth {
            warn!(
                "Callback backlog at {} units (warn threshold {})",
                depth, self.warn_depth
            );
        }
        Ok(())
    }

    /// Remove and return the oldest unit without blocking
    pub fn pop(&self) -> Option<PendingUnit> {
        self.lock().units.pop_front()
    }

    /// Block until a unit is available or abort has been requested
    ///
    /// Queued units are still returned after abort; `Next::Stop` is only
    /// returned once the queue is empty, and the queue is closed at that point.
    pub fn wait_next(&self) -> Next {
        let mut state = self
            .ready
            .wait_while(self.lock(), |state| state.units.is_empty() && !state.abort)
            .unwrap_or_else(PoisonError::into_inner);

        match state.units.pop_front() {
            Some(unit) => Next::Unit(unit),
            None => {
                state.closed = true;
                Next::Stop
            }
        }
    }

    /// Ask the dispatcher to stop once the queue is drained
    pub fn abort(&self) {
        let mut state = self.lock();
        state.abort = true;
        self.ready.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().abort
    }

    /// True once the dispatcher has observed abort with an empty queue
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CallbackQueue {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff;
    use crate::unit::{CallbackUnit, UnitId};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn pending(id: u64) -> PendingUnit {
        let (signal, _waiter) = handoff::channel::<()>();
        PendingUnit::bind(UnitId(id), CallbackUnit::new((), |_ctx, ()| ()), signal)
    }

    fn next_id(queue: &CallbackQueue) -> Option<u64> {
        match queue.wait_next() {
            Next::Unit(unit) => Some(unit.id().0),
            Next::Stop => None,
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = CallbackQueue::default();
        for id in 1..=3 {
            queue.push(pending(id)).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().map(|u| u.id().0), Some(1));
        assert_eq!(queue.pop().map(|u| u.id().0), Some(2));
        assert_eq!(queue.pop().map(|u| u.id().0), Some(3));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_pop_empty_does_not_block() {
        let queue = CallbackQueue::default();
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wait_next_wakes_on_push() {
        let queue = Arc::new(CallbackQueue::default());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || next_id(&queue))
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(pending(42)).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_abort_wakes_idle_waiter() {
        let queue = Arc::new(CallbackQueue::default());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || next_id(&queue))
        };
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        queue.abort();
        assert_eq!(consumer.join().unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(queue.is_closed());
    }

    #[test]
    fn test_abort_drains_before_stop() {
        let queue = CallbackQueue::default();
        queue.push(pending(1)).unwrap();
        assert!(!queue.is_aborted());
        queue.abort();
        assert!(queue.is_aborted());
        // Pushed after abort but before the dispatcher looked: still delivered
        queue.push(pending(2)).unwrap();

        assert_eq!(next_id(&queue), Some(1));
        assert_eq!(next_id(&queue), Some(2));
        assert!(!queue.is_closed());
        assert_eq!(next_id(&queue), None);
        assert!(queue.is_closed());
    }

    #[test]
    fn test_push_after_close_is_rejected() {
        let queue = CallbackQueue::default();
        queue.abort();
        assert_eq!(next_id(&queue), None);

        let Rejected(unit) = queue.push(pending(5)).unwrap_err();
        assert_eq!(unit.id(), UnitId(5));
        assert!(queue.is_empty());
    }
}
