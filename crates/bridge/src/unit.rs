//! Callback units
//!
//! A [`CallbackUnit`] is one pending cross-thread invocation: a typed payload
//! plus a one-shot function that runs against it inside the host domain.
//! Once submitted it is bound to its handoff [`Signal`] and type-erased into a
//! [`PendingUnit`] so units with different payload and result types can share
//! one queue.

use crate::execution::Fault;
use crate::handoff::Signal;
use crate::host::HostContext;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

/// Panic payload captured from a faulting callback
pub(crate) type PanicPayload = Box<dyn Any + Send + 'static>;

/// Host-side entry point of a callback
pub type HostFn<P, R> = Box<dyn FnOnce(&HostContext, P) -> R + Send + 'static>;

/// Identifier assigned to each submitted unit, for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One pending callback: payload plus the host function to run with it
pub struct CallbackUnit<P, R> {
    payload: P,
    function: HostFn<P, R>,
}

impl<P, R> CallbackUnit<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Create a unit from a payload and the host function to invoke with it
    pub fn new<F>(payload: P, function: F) -> Self
    where
        F: FnOnce(&HostContext, P) -> R + Send + 'static,
    {
        Self {
            payload,
            function: Box::new(function),
        }
    }

    /// Payload carried by this unit
    pub fn payload(&self) -> &P {
        &self.payload
    }

    fn invoke(self, ctx: &HostContext) -> R {
        (self.function)(ctx, self.payload)
    }
}

impl<P: fmt::Debug, R> fmt::Debug for CallbackUnit<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackUnit")
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Type-erased unit bound to its handoff signal
pub(crate) trait Runnable: Send {
    /// Run the unit and signal its handoff. `finished` is told whether the
    /// host function succeeded just before the waiter is released. Returns the
    /// panic payload if the host function faulted; the handoff has already
    /// been signaled by then.
    fn run(self: Box<Self>, ctx: &HostContext, finished: &dyn Fn(bool)) -> Option<PanicPayload>;
}

struct Bound<P, R> {
    unit: CallbackUnit<P, R>,
    signal: Signal<R>,
}

impl<P, R> Runnable for Bound<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    fn run(self: Box<Self>, ctx: &HostContext, finished: &dyn Fn(bool)) -> Option<PanicPayload> {
        let Bound { unit, signal } = *self;
        match catch_unwind(AssertUnwindSafe(|| unit.invoke(ctx))) {
            Ok(value) => {
                finished(true);
                signal.signal(Ok(value));
                None
            }
            Err(payload) => {
                finished(false);
                signal.signal(Err(Fault::from_panic(payload.as_ref())));
                Some(payload)
            }
        }
    }
}

/// A unit waiting in the callback queue
pub struct PendingUnit {
    pub(crate) id: UnitId,
    pub(crate) submitted_at: Instant,
    pub(crate) job: Box<dyn Runnable>,
}

impl PendingUnit {
    pub(crate) fn bind<P, R>(id: UnitId, unit: CallbackUnit<P, R>, signal: Signal<R>) -> Self
    where
        P: Send + 'static,
        R: Send + 'static,
    {
        Self {
            id,
            submitted_at: Instant::now(),
            job: Box::new(Bound { unit, signal }),
        }
    }

    /// Identifier assigned at submission
    pub fn id(&self) -> UnitId {
        self.id
    }
}

impl fmt::Debug for PendingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingUnit")
            .field("id", &self.id)
            .field("submitted_at", &self.submitted_at)
            .finish_non_exhaustive()
    }
}
