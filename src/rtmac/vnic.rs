//! The tunnel interface for best-effort traffic sharing a TDMA-disciplined
//! wire.

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};

use crate::device::DeviceHandle;
use crate::error::Result;
use crate::rtskb::DefaultSkb;
use crate::sync::IrqSpinlock;

use super::discipline::Discipline;

/// Wraps outgoing best-effort frames in a tunnel header and hands them to
/// the attached discipline's `nrt_packet_tx`; buffers `tunnel_rx` delivers
/// for a conventional network stack to poll.
pub struct Vnic {
    device: Weak<crate::device::DeviceRecord>,
    discipline: Arc<dyn Discipline>,
    rx_queue: IrqSpinlock<VecDeque<(u16, DefaultSkb)>>,
}

impl Vnic {
    pub(super) fn new(device: &DeviceHandle, discipline: Arc<dyn Discipline>) -> Self {
        Self {
            device: Arc::downgrade(device),
            discipline,
            rx_queue: IrqSpinlock::new(VecDeque::new()),
        }
    }

    /// Wraps `skb` in a tunnel header (inner ethertype taken from
    /// `skb.protocol`) and hands it to the discipline's non-real-time
    /// transmit hook.
    pub fn transmit(&self, skb: DefaultSkb) -> Result<()> {
        let dev = self.device.upgrade().ok_or(crate::error::Error::NoSuchDevice)?;
        self.discipline.nrt_packet_tx(skb, &dev)
    }

    /// Called by the RTmac receive dispatcher when a tunneled frame
    /// arrives, with the inner EtherType recovered from the RTmac header.
    pub(super) fn tunnel_rx(&self, inner_ethertype: u16, skb: DefaultSkb) {
        self.rx_queue.lock().push_back((inner_ethertype, skb));
    }

    /// Pops one tunneled receive, for a conventional network stack (e.g.
    /// an `smoltcp` interface) to drain.
    pub fn pop(&self) -> Option<(u16, DefaultSkb)> {
        self.rx_queue.lock().pop_front()
    }

    pub fn pending(&self) -> usize {
        self.rx_queue.lock().len()
    }
}

#[cfg(feature = "smoltcp")]
mod phy {
    use smoltcp::phy::{self, Checksum, ChecksumCapabilities, DeviceCapabilities, Medium};
    use smoltcp::time::Instant;

    use super::Vnic;
    use crate::rtskb::{DefaultPool, RTSKB_SIZE};
    use alloc::sync::Arc;

    /// Drives a [`Vnic`] as an `smoltcp` `Device`, so best-effort traffic
    /// tunneled over a TDMA-disciplined link can still speak IP. `pool` is
    /// where transmit tokens draw their buffers from.
    pub struct VnicDevice {
        pub(super) vnic: Arc<Vnic>,
        pub(super) pool: Arc<DefaultPool>,
    }

    impl VnicDevice {
        pub fn new(vnic: Arc<Vnic>, pool: Arc<DefaultPool>) -> Self {
            Self { vnic, pool }
        }
    }

    impl phy::Device for VnicDevice {
        type RxToken<'a> = RxToken where Self: 'a;
        type TxToken<'a> = TxToken<'a> where Self: 'a;

        fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
            let (_ethertype, skb) = self.vnic.pop()?;
            Some((
                RxToken { skb },
                TxToken {
                    vnic: &self.vnic,
                    pool: &self.pool,
                },
            ))
        }

        fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
            Some(TxToken {
                vnic: &self.vnic,
                pool: &self.pool,
            })
        }

        fn capabilities(&self) -> DeviceCapabilities {
            let mut caps = DeviceCapabilities::default();
            caps.max_transmission_unit = RTSKB_SIZE - crate::rtmac::HEADER_LEN;
            caps.medium = Medium::Ethernet;
            caps.checksum = ChecksumCapabilities::default();
            caps.checksum.ipv4 = Checksum::Tx;
            caps
        }
    }

    pub struct RxToken {
        skb: crate::rtskb::DefaultSkb,
    }

    impl phy::RxToken for RxToken {
        fn consume<R, F: FnOnce(&mut [u8]) -> R>(mut self, f: F) -> R {
            f(self.skb.payload_mut())
        }
    }

    pub struct TxToken<'a> {
        vnic: &'a Vnic,
        pool: &'a Arc<DefaultPool>,
    }

    impl<'a> phy::TxToken for TxToken<'a> {
        fn consume<R, F: FnOnce(&mut [u8]) -> R>(self, len: usize, f: F) -> R {
            let mut skb = self.pool.alloc().expect("vnic tx pool exhausted");
            skb.reserve(crate::rtmac::HEADER_LEN)
                .expect("fresh buffer always has room for the tunnel header");
            let buf = skb.put(len).expect("frame exceeds vnic MTU");
            let result = f(buf);
            let _ = self.vnic.transmit(skb);
            result
        }
    }
}

#[cfg(feature = "smoltcp")]
pub use phy::VnicDevice;
