//! The one-shot timer contract consumed by the engine.
//!
//! The crate never owns a timer thread or a process-global schedule
//! queue; it is handed a `TimerService` implementation by the embedder
//! and only ever arms one outstanding timeout per `Client` at a time.
//! Arming a new one implicitly cancels whatever was previously
//! scheduled.

use std::time::Duration;

/// Opaque identifier for the single outstanding timer of a `Client`.
///
/// `Client` hands one of these back out of `Client::new`; the embedder
/// passes it back into `Client::timer_fired` when its own event loop
/// observes that the timer has elapsed. There is exactly one live
/// `TimerHandle` per `Client`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// A one-shot timer scheduler, implemented by the embedding application.
///
/// Tick resolution is 1 second. Scheduling duration zero
/// is equivalent to `cancel` (fires on the next tick, or can simply be
/// treated as "already expired" -- the engine never relies on zero-delay
/// ordering guarantees).
pub trait TimerService {
    /// Arm (or re-arm) the one-shot timer identified by `handle` to fire
    /// after `after`. A prior pending fire for the same handle is
    /// canceled implicitly.
    fn schedule(&mut self, handle: TimerHandle, after: Duration);

    /// Cancel a pending timer. A no-op if nothing is scheduled.
    fn cancel(&mut self, handle: TimerHandle);
}
