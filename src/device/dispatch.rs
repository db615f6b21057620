//! EtherType-keyed packet dispatch and the stack-manager receive queue.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::rtskb::DefaultSkb;
use crate::sync::{AdminMutex, IrqSpinlock};

/// A protocol handler registered against one EtherType.
pub trait PacketHandler: Send + Sync {
    fn receive(&self, skb: DefaultSkb);
}

struct Entry {
    handler: Arc<dyn PacketHandler>,
    /// Count of invocations currently in flight, so `remove_pack` can tell
    /// a caller to keep polling instead of racing a handler mid-call.
    in_flight: AtomicUsize,
    removing: bool,
}

/// The `{ethertype → handler}` table drivers register against with
/// `add_pack`/`remove_pack`.
pub struct PacketDispatcher {
    table: AdminMutex<BTreeMap<u16, Entry>>,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self {
            table: AdminMutex::new(BTreeMap::new()),
        }
    }

    /// Registers `handler` for `ethertype`. Fails with [`Error::Busy`] if
    /// something is already registered for it.
    pub fn add_pack(&self, ethertype: u16, handler: Arc<dyn PacketHandler>) -> Result<()> {
        let mut table = self.table.lock();
        if table.contains_key(&ethertype) {
            return Err(Error::Busy);
        }
        table.insert(
            ethertype,
            Entry {
                handler,
                in_flight: AtomicUsize::new(0),
                removing: false,
            },
        );
        Ok(())
    }

    /// Requests removal of the handler for `ethertype`. Returns
    /// [`Error::Busy`] (and leaves the handler marked as draining, so no
    /// further invocations start) while a call into it may still be in
    /// flight; callers poll this with a back-off, as a driver unload path
    /// does, until it returns `Ok`.
    pub fn remove_pack(&self, ethertype: u16) -> Result<()> {
        let mut table = self.table.lock();
        let entry = match table.get_mut(&ethertype) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        entry.removing = true;
        if entry.in_flight.load(Ordering::Acquire) > 0 {
            return Err(Error::Busy);
        }
        table.remove(&ethertype);
        Ok(())
    }

    /// Resolves `ethertype` and invokes its handler, if any and if it is
    /// not draining. Called from the stack-manager task, never from an
    /// ISR.
    pub fn dispatch(&self, ethertype: u16, skb: DefaultSkb) {
        let handler = {
            let table = self.table.lock();
            match table.get(&ethertype) {
                Some(entry) if !entry.removing => {
                    entry.in_flight.fetch_add(1, Ordering::AcqRel);
                    Some(entry.handler.clone())
                }
                _ => None,
            }
        };
        match handler {
            Some(handler) => {
                handler.receive(skb);
                let table = self.table.lock();
                if let Some(entry) = table.get(&ethertype) {
                    entry.in_flight.fetch_sub(1, Ordering::AcqRel);
                }
            }
            None => log::debug!("rtnet: no handler for ethertype {ethertype:#06x}, dropping"),
        }
    }
}

impl Default for PacketDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// The ISR-side receive queue and the task that drains it.
///
/// `netif_rx` is the only operation ever called from interrupt context; it
/// must not block, so it pushes onto an `IrqSpinlock`-guarded queue and
/// signals an [`crate::sync::rtos::RtEvent`] rather than dispatching
/// directly.
pub struct StackManager {
    queue: IrqSpinlock<VecDeque<DefaultSkb>>,
}

impl StackManager {
    pub fn new() -> Self {
        Self {
            queue: IrqSpinlock::new(VecDeque::new()),
        }
    }

    /// Places a received buffer on the queue and wakes the stack-manager
    /// task. Safe to call from an ISR. The caller (the driver's ISR) must
    /// have already stamped `skb.ifindex` and `skb.rx_timestamp_ns`.
    pub fn netif_rx(&self, skb: DefaultSkb, event: &dyn crate::sync::rtos::RtEvent) {
        self.queue.lock().push_back(skb);
        event.signal();
    }

    /// Pops one buffer, if any, without blocking.
    pub fn pop(&self) -> Option<DefaultSkb> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every currently queued buffer through `dispatcher`, resolving
    /// each by the protocol stamped in `skb.protocol`. This is the body of
    /// the stack-manager task's wakeup handler.
    pub fn drain(&self, dispatcher: &PacketDispatcher) {
        while let Some(skb) = self.pop() {
            let ethertype = skb.protocol;
            dispatcher.dispatch(ethertype, skb);
        }
    }
}

impl Default for StackManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtskb::{Pool, PoolRole, RTSKB_SIZE};
    use crate::sync::rtos::RtEvent;
    use alloc::sync::Arc as StdArc;
    use core::sync::atomic::AtomicUsize as StdAtomicUsize;

    struct Counter(StdArc<StdAtomicUsize>);
    impl PacketHandler for Counter {
        fn receive(&self, _skb: DefaultSkb) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn add_pack_then_remove_pack_round_trip() {
        let dispatcher = PacketDispatcher::new();
        let hits = StdArc::new(StdAtomicUsize::new(0));
        dispatcher
            .add_pack(0x0800, StdArc::new(Counter(hits.clone())))
            .unwrap();
        assert!(matches!(dispatcher.add_pack(0x0800, StdArc::new(Counter(hits.clone()))), Err(Error::Busy)));

        let pool = Pool::<RTSKB_SIZE>::new("test", PoolRole::Global, 1);
        let skb = pool.alloc().unwrap();
        dispatcher.dispatch(0x0800, skb);
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        dispatcher.remove_pack(0x0800).unwrap();
        assert!(dispatcher.add_pack(0x0800, StdArc::new(Counter(hits))).is_ok());
    }

    #[test]
    fn dispatch_to_unknown_ethertype_drops_silently() {
        let dispatcher = PacketDispatcher::new();
        let pool = Pool::<RTSKB_SIZE>::new("test", PoolRole::Global, 1);
        let skb = pool.alloc().unwrap();
        dispatcher.dispatch(0x1234, skb);
    }

    #[test]
    fn stack_manager_fifo_drain_invokes_dispatcher() {
        let dispatcher = PacketDispatcher::new();
        let hits = StdArc::new(StdAtomicUsize::new(0));
        dispatcher
            .add_pack(0x0806, StdArc::new(Counter(hits.clone())))
            .unwrap();

        let manager = StackManager::new();
        let pool = Pool::<RTSKB_SIZE>::new("test", PoolRole::Global, 2);
        let event = crate::sync::rtos::TestEvent::new();

        let mut a = pool.alloc().unwrap();
        a.protocol = 0x0806;
        manager.netif_rx(a, &event);
        let mut b = pool.alloc().unwrap();
        b.protocol = 0x0806;
        manager.netif_rx(b, &event);

        assert_eq!(manager.len(), 2);
        manager.drain(&dispatcher);
        assert_eq!(hits.load(Ordering::Relaxed), 2);
        assert!(manager.is_empty());
    }

    #[test]
    fn netif_rx_signals_the_wakeup_event() {
        let manager = StackManager::new();
        let pool = Pool::<RTSKB_SIZE>::new("test", PoolRole::Global, 1);
        let event = crate::sync::rtos::TestEvent::new();
        manager.netif_rx(pool.alloc().unwrap(), &event);
        // TestEvent::wait consumes the signal exactly once.
        assert!(event.wait(None).is_ok());
        assert!(event.wait(None).is_err());
    }
}
