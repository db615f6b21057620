//! Control transport: posts calls from a non-real-time context onto a queue
//! a real-time handler drains.
//!
//! A call carries a command buffer, an optional timeout, an optional
//! result-copy callback and an optional cleanup callback. [`Dispatcher::call`]
//! pushes the call, wakes the handler, and blocks the caller on completion or
//! timeout. [`Dispatcher::next_call`]/[`Dispatcher::complete`] are the
//! handler's side: pop the next call, do the work, hand back a result.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::time::Duration;

use crate::error::{Error, Result};
use crate::sync::rtos::RtEvent;
use crate::sync::AdminMutex;

/// How many calls may be queued awaiting a handler before `call` returns
/// [`Error::OutOfMemory`]. Bounds the queue of calls without letting a
/// stalled handler grow it without bound.
pub const MAX_PENDING_CALLS: usize = 64;

struct Slot {
    command: Vec<u8>,
    result: Option<Vec<u8>>,
    cleanup_armed: bool,
}

struct PendingCall {
    slot: Arc<AdminMutex<Slot>>,
    completion: Arc<dyn RtEvent>,
}

/// Serializes calls between a non-real-time poster and a real-time handler.
///
/// `handler_wakeup` is signaled on every `call`; the handler task waits on it
/// and drains the queue with [`Self::next_call`].
pub struct Dispatcher {
    queue: AdminMutex<VecDeque<PendingCall>>,
    handler_wakeup: Arc<dyn RtEvent>,
}

/// A call popped by the handler side. Holds the command buffer and lets the
/// handler either finish normally ([`Self::complete`]) or disarm the
/// caller's cleanup to keep ownership of attached buffers.
pub struct InFlightCall {
    slot: Arc<AdminMutex<Slot>>,
    completion: Arc<dyn RtEvent>,
}

impl InFlightCall {
    pub fn command(&self) -> Vec<u8> {
        self.slot.lock().command.clone()
    }

    /// Prevents the caller's cleanup callback from running, so the handler
    /// (or code it handed the buffer to) can keep using it past completion.
    pub fn disarm_cleanup(&self) {
        self.slot.lock().cleanup_armed = false;
    }

    /// Writes the result buffer and wakes the caller.
    pub fn complete(self, result: Vec<u8>) {
        self.slot.lock().result = Some(result);
        self.completion.signal();
    }
}

impl Dispatcher {
    pub fn new(handler_wakeup: Arc<dyn RtEvent>) -> Self {
        Self {
            queue: AdminMutex::new(VecDeque::new()),
            handler_wakeup,
        }
    }

    /// Posts `command`, wakes the handler, and blocks until it completes or
    /// `timeout` elapses. On success, `result_copy` (if given) receives the
    /// handler's result bytes; `cleanup` (if given and not disarmed by the
    /// handler) always runs last, with ownership of `command`.
    ///
    /// On timeout the call is left on the handler's slot — a handler that
    /// finishes late still completes into a result buffer nobody reads, then
    /// `cleanup` drops it, leaving the handler free to complete into a
    /// discarded buffer instead of having to notice the timeout itself.
    pub fn call(
        &self,
        command: Vec<u8>,
        timeout: Option<Duration>,
        completion: Arc<dyn RtEvent>,
        result_copy: Option<&mut dyn FnMut(&[u8])>,
        cleanup: Option<&mut dyn FnMut(Vec<u8>)>,
    ) -> Result<()> {
        let slot = Arc::new(AdminMutex::new(Slot {
            command: command.clone(),
            result: None,
            cleanup_armed: true,
        }));

        {
            let mut queue = self.queue.lock();
            if queue.len() >= MAX_PENDING_CALLS {
                log::warn!("rpc: call queue full at {MAX_PENDING_CALLS} pending, rejecting");
                return Err(Error::OutOfMemory);
            }
            queue.push_back(PendingCall {
                slot: slot.clone(),
                completion: completion.clone(),
            });
        }
        self.handler_wakeup.signal();

        let wait_result = completion.wait(timeout);

        let (result, cleanup_armed) = {
            let s = slot.lock();
            (s.result.clone(), s.cleanup_armed)
        };

        if wait_result.is_ok() {
            if let (Some(result), Some(copy)) = (result, result_copy) {
                copy(&result);
            }
        } else {
            log::debug!("rpc: call timed out waiting on handler");
        }

        if cleanup_armed {
            if let Some(cleanup) = cleanup {
                cleanup(command);
            }
        }

        wait_result
    }

    /// Pops the next queued call, for the real-time handler to process.
    pub fn next_call(&self) -> Option<InFlightCall> {
        let pending = self.queue.lock().pop_front()?;
        Some(InFlightCall {
            slot: pending.slot,
            completion: pending.completion,
        })
    }

    pub fn pending_len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::rtos::TestEvent;
    use alloc::sync::Arc as StdArc;

    #[test]
    fn handler_completes_call_and_caller_reads_the_result() {
        let dispatcher = Dispatcher::new(StdArc::new(TestEvent::new()));
        let slot = StdArc::new(AdminMutex::new(Slot {
            command: alloc::vec![1, 2, 3],
            result: None,
            cleanup_armed: true,
        }));
        let completion = StdArc::new(TestEvent::new());
        dispatcher.queue.lock().push_back(PendingCall {
            slot: slot.clone(),
            completion: completion.clone(),
        });

        let in_flight = dispatcher.next_call().unwrap();
        assert_eq!(in_flight.command(), alloc::vec![1, 2, 3]);
        in_flight.complete(alloc::vec![9, 9]);

        assert!(completion.wait(None).is_ok());
        assert_eq!(slot.lock().result, Some(alloc::vec![9, 9]));
    }

    #[test]
    fn call_times_out_when_nobody_services_the_queue() {
        let dispatcher = Dispatcher::new(StdArc::new(TestEvent::new()));
        let completion = StdArc::new(TestEvent::new());
        let mut copied = false;
        let mut cleaned = false;
        let result = dispatcher.call(
            alloc::vec![1],
            Some(Duration::from_millis(10)),
            completion,
            Some(&mut |_| copied = true),
            Some(&mut |_| cleaned = true),
        );
        assert!(matches!(result, Err(Error::TimedOut)));
        assert!(!copied);
        assert!(cleaned);
        assert_eq!(dispatcher.pending_len(), 1);
    }

    #[test]
    fn disarm_cleanup_leaves_it_unset() {
        let dispatcher = Dispatcher::new(StdArc::new(TestEvent::new()));
        let command = alloc::vec![5];
        let slot = StdArc::new(AdminMutex::new(Slot {
            command,
            result: None,
            cleanup_armed: true,
        }));
        dispatcher.queue.lock().push_back(PendingCall {
            slot: slot.clone(),
            completion: StdArc::new(TestEvent::new()),
        });
        let in_flight = dispatcher.next_call().unwrap();
        in_flight.disarm_cleanup();
        in_flight.complete(Vec::new());
        assert!(!slot.lock().cleanup_armed);
    }

    #[test]
    fn queue_full_rejects_further_calls() {
        let dispatcher = Dispatcher::new(StdArc::new(TestEvent::new()));
        for _ in 0..MAX_PENDING_CALLS {
            dispatcher.queue.lock().push_back(PendingCall {
                slot: StdArc::new(AdminMutex::new(Slot {
                    command: Vec::new(),
                    result: None,
                    cleanup_armed: true,
                })),
                completion: StdArc::new(TestEvent::new()),
            });
        }
        let result = dispatcher.call(Vec::new(), None, StdArc::new(TestEvent::new()), None, None);
        assert!(matches!(result, Err(Error::OutOfMemory)));
    }
}
