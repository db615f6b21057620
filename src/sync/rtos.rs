//! Interface to the host real-time operating system.
//!
//! Tasks, events and timers are provided by the embedding kernel, kept as an
//! external collaborator referenced only by interface. This module defines
//! the narrow surface this crate needs from it, the single seam between
//! architecture-independent logic and a concrete backend.

use alloc::boxed::Box;
use core::time::Duration;

use crate::error::{Error, Result};

/// A real-time wait/signal event.
///
/// Corresponds to `rtdm_event` in the original real-time driver model:
/// `worker_wakeup`, `sync_event` and `xmit_event` are all instances of this
/// trait, one per TDMA device, supplied by the host.
pub trait RtEvent: Send + Sync {
    /// Blocks the calling real-time task until the event is signaled or
    /// `timeout` elapses. `None` waits indefinitely.
    ///
    /// Returns [`Error::TimedOut`] on expiry and [`Error::Interrupted`] if a
    /// signal interrupted the wait (the caller should restart it).
    fn wait(&self, timeout: Option<Duration>) -> Result<()>;

    /// Wakes exactly one waiter (or none, if nobody is waiting).
    fn signal(&self);
}

/// A handle to a schedulable real-time task.
///
/// The TDMA worker and the stack-manager dispatcher both run as one of
/// these; the embedding kernel owns the actual thread/fiber.
pub trait RtTask: Send {
    /// Requests the task stop at its next safe point and blocks until it has
    /// exited. Mirrors `rtdm_task_join_nrt`, which device-ifdown waits on
    /// synchronously.
    fn join(self: Box<Self>);
}

/// Spawns real-time tasks and schedules one-shot timers.
///
/// An embedding kernel implements this once and passes `&dyn RtExecutor` (or
/// a concrete type) to [`crate::tdma::TdmaDiscipline::attach`] and
/// [`crate::rpc::Dispatcher::new`].
pub trait RtExecutor: Send + Sync {
    /// Spawns `f` as a real-time task named `name` at the given priority
    /// (lower value = higher priority, matching the `DEF_WORKER_PRIO`
    /// convention) and returns a handle to it.
    fn spawn(
        &self,
        name: &'static str,
        priority: u8,
        f: Box<dyn FnMut() + Send>,
    ) -> Box<dyn RtTask>;

    /// Monotonic nanoseconds since an arbitrary epoch fixed at boot.
    ///
    /// The TDMA cycle scheduler and RTcfg heartbeat timers are both built
    /// from differences of this value; no wall-clock semantics are implied.
    fn now_ns(&self) -> u64;

    /// Schedules a one-shot wakeup, expressed as an absolute `now_ns()`
    /// value, that should fire the given event.
    fn arm_timer(&self, deadline_ns: u64, event: &dyn RtEvent);
}

/// Fallible conversion from a `Duration` to the nanosecond count this
/// crate's timers operate in, saturating rather than panicking on overflow —
/// cycle periods are specified in nanoseconds and never approach `u64::MAX`.
pub(crate) fn duration_to_ns(d: Duration) -> u64 {
    d.as_nanos().min(u64::MAX as u128) as u64
}

/// A minimal, single-threaded [`RtEvent`] suitable for unit tests: it
/// remembers whether it has been signaled and never actually blocks. Not
/// exported outside test builds — production code always gets events from
/// an [`RtExecutor`] implementation.
#[cfg(test)]
pub(crate) struct TestEvent {
    signaled: core::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl TestEvent {
    pub(crate) const fn new() -> Self {
        Self {
            signaled: core::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
impl RtEvent for TestEvent {
    fn wait(&self, _timeout: Option<Duration>) -> Result<()> {
        if self.signaled.swap(false, core::sync::atomic::Ordering::AcqRel) {
            Ok(())
        } else {
            Err(Error::TimedOut)
        }
    }

    fn signal(&self) {
        self.signaled
            .store(true, core::sync::atomic::Ordering::Release);
    }
}
