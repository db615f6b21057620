//! A registered network device: administrative state, ring bookkeeping and
//! the active transmit hook, independent of any particular driver.

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::rtskb::DefaultSkb;
use crate::sync::{AdminMutex, IrqSpinlock};

bitflags::bitflags! {
    /// Administrative and capability flags, named after their Linux
    /// `IFF_*` counterparts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceFlags: u32 {
        const UP        = 0b0001;
        const BROADCAST = 0b0010;
        const LOOPBACK  = 0b0100;
        const PROMISC   = 0b1000;
    }
}

/// A device's real-time transmit entry point: either the driver's own, or a
/// MAC discipline's interception of it (its `rt_packet_tx`).
pub trait TxHandler: Send + Sync {
    fn transmit(&self, skb: DefaultSkb) -> crate::error::Result<()>;
}

/// Receive-ring and transmit-ring bookkeeping. The exact shape of the rings
/// is left to the driver; this crate only needs to know how many descriptors
/// are in flight for reporting purposes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingState {
    pub capacity: usize,
    pub in_flight: usize,
}

pub(super) struct MutableState {
    pub flags: DeviceFlags,
    pub rx_ring: RingState,
    pub tx_ring: RingState,
    /// Swapped to a discipline's hook by `rtmac::attach` and restored by
    /// `detach`; starts out equal to `original_tx`.
    pub active_tx: Arc<dyn TxHandler>,
}

/// A registered network interface. Returned wrapped in an `Arc` (a
/// [`DeviceHandle`]) so that `get_by_index`/`get_by_name` can hand out a
/// referenced copy without a second reference-counting mechanism layered on
/// top of Rust's own.
pub struct DeviceRecord {
    ifindex: u32,
    name: String,
    hw_addr: [u8; 6],
    mtu: AtomicU32,
    pub local_ip: Option<[u8; 4]>,
    pub broadcast_ip: Option<[u8; 4]>,
    /// Opaque driver cookie, carried but never interpreted by this crate.
    pub base_addr: usize,

    original_tx: Arc<dyn TxHandler>,
    state: IrqSpinlock<MutableState>,
    /// Held across attach/detach so only one discipline operation runs at a
    /// time per device.
    pub(crate) admin_mutex: AdminMutex<()>,
    refcount: AtomicUsize,
}

impl DeviceRecord {
    pub(super) fn new(
        ifindex: u32,
        name: String,
        hw_addr: [u8; 6],
        mtu: u16,
        flags: DeviceFlags,
        local_ip: Option<[u8; 4]>,
        broadcast_ip: Option<[u8; 4]>,
        base_addr: usize,
        original_tx: Arc<dyn TxHandler>,
    ) -> Self {
        Self {
            ifindex,
            name,
            hw_addr,
            mtu: AtomicU32::new(mtu as u32),
            local_ip,
            broadcast_ip,
            base_addr,
            original_tx: original_tx.clone(),
            state: IrqSpinlock::new(MutableState {
                flags,
                rx_ring: RingState::default(),
                tx_ring: RingState::default(),
                active_tx: original_tx,
            }),
            admin_mutex: AdminMutex::new(()),
            refcount: AtomicUsize::new(1),
        }
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hw_addr(&self) -> [u8; 6] {
        self.hw_addr
    }

    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Relaxed) as u16
    }

    pub fn set_mtu(&self, mtu: u16) {
        self.mtu.store(mtu as u32, Ordering::Relaxed);
    }

    pub fn flags(&self) -> DeviceFlags {
        self.state.lock().flags
    }

    pub fn set_flags(&self, flags: DeviceFlags) {
        self.state.lock().flags = flags;
    }

    pub fn is_up(&self) -> bool {
        self.flags().contains(DeviceFlags::UP)
    }

    pub fn rx_ring(&self) -> RingState {
        self.state.lock().rx_ring
    }

    pub fn tx_ring(&self) -> RingState {
        self.state.lock().tx_ring
    }

    pub fn set_rx_ring(&self, ring: RingState) {
        self.state.lock().rx_ring = ring;
    }

    pub fn set_tx_ring(&self, ring: RingState) {
        self.state.lock().tx_ring = ring;
    }

    /// The driver's original transmit entry point, untouched by any
    /// attached discipline. `rtmac::detach` restores the active hook to
    /// this.
    pub fn original_tx(&self) -> Arc<dyn TxHandler> {
        self.original_tx.clone()
    }

    /// The entry point callers should actually use: the driver's own, or a
    /// discipline's interception of it.
    pub fn active_tx(&self) -> Arc<dyn TxHandler> {
        self.state.lock().active_tx.clone()
    }

    /// Redirects the active transmit entry point, as `rtmac::attach` does
    /// when installing a discipline's `rt_packet_tx`.
    pub(crate) fn set_active_tx(&self, handler: Arc<dyn TxHandler>) {
        self.state.lock().active_tx = handler;
    }

    /// Restores the active transmit entry point to the driver's original,
    /// as `rtmac::detach` does.
    pub(crate) fn restore_original_tx(&self) {
        let original = self.original_tx.clone();
        self.state.lock().active_tx = original;
    }

    /// Sends `skb` through the active transmit entry point. If a discipline
    /// is attached, it will prepend its own header by calling `push` on
    /// `skb`; callers building a frame for transmission must `reserve` that
    /// discipline's header length before `put`ting their payload, or the
    /// `push` fails with `NoSpace`.
    pub fn transmit(&self, skb: DefaultSkb) -> crate::error::Result<()> {
        if !self.is_up() {
            return Err(crate::error::Error::NetworkDown);
        }
        self.active_tx().transmit(skb)
    }

    pub(super) fn hold(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one reference, mirroring the original driver model's
    /// `dereference` call. Implemented as a plain counter kept for parity
    /// with that reference-counted record; the `Arc<DeviceRecord>` handle
    /// itself, not this counter, is what actually frees the record's
    /// memory once the last handle is dropped.
    pub(super) fn release(&self) -> usize {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Relaxed)
    }
}

/// A referenced handle to a device record, as returned by
/// [`super::registry::DeviceRegistry::get_by_index`] and
/// [`super::registry::DeviceRegistry::get_by_name`].
pub type DeviceHandle = Arc<DeviceRecord>;

/// Drops a reference obtained from the registry. Named to match the
/// original driver model's explicit `dereference` call rather than leaving
/// the drop implicit; equivalent to letting `handle` go out of scope.
pub fn dereference(handle: DeviceHandle) {
    handle.release();
    drop(handle);
}
