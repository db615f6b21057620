//! Attach/detach orchestration: the non-real-time path that installs and
//! removes a discipline on a device.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};

use crate::device::{DeviceFlags, DeviceHandle, TxHandler};
use crate::error::{Error, Result};
use crate::rtskb::DefaultSkb;
use crate::sync::AdminMutex;

use super::discipline::{Discipline, DisciplineRegistry};
use super::header::{HeaderFlags, RtmacHeader, HEADER_LEN};
use super::vnic::Vnic;

/// What `attach` installs on a device: the discipline, and the VNIC that
/// tunnels best-effort traffic across it.
pub struct Attachment {
    pub discipline: Arc<dyn Discipline>,
    pub vnic: Arc<Vnic>,
}

struct DisciplineTxHandler {
    discipline: Arc<dyn Discipline>,
    device: Weak<crate::device::DeviceRecord>,
}

impl TxHandler for DisciplineTxHandler {
    fn transmit(&self, skb: DefaultSkb) -> Result<()> {
        let dev = self.device.upgrade().ok_or(Error::NoSuchDevice)?;
        self.discipline.rt_packet_tx(skb, &dev)
    }
}

/// Owns the discipline registry and the table of per-device attachments.
/// One instance serves an entire embedding (there is exactly one RTmac
/// layer, the way there is exactly one device registry).
pub struct MacLayer {
    pub disciplines: DisciplineRegistry,
    attachments: AdminMutex<BTreeMap<u32, Attachment>>,
}

impl MacLayer {
    pub fn new() -> Self {
        Self {
            disciplines: DisciplineRegistry::new(),
            attachments: AdminMutex::new(BTreeMap::new()),
        }
    }

    /// Attaches `disc` to `dev`. Requires `dev` not be a loopback and not
    /// already attached; redirects `dev`'s active transmit entry point to
    /// `disc.rt_packet_tx` and creates a VNIC for tunneled traffic. On any
    /// failure after `disc.attach` succeeds, the attachment is rolled back
    /// in reverse order before the error is returned.
    pub fn attach(&self, dev: &DeviceHandle, disc: Arc<dyn Discipline>) -> Result<()> {
        let _admin = dev.admin_mutex.lock();

        if dev.flags().contains(DeviceFlags::LOOPBACK) {
            return Err(Error::InvalidArgument);
        }
        {
            let attachments = self.attachments.lock();
            if attachments.contains_key(&dev.ifindex()) {
                return Err(Error::Busy);
            }
        }

        disc.attach(dev)?;

        let vnic = Arc::new(Vnic::new(dev, disc.clone()));
        dev.set_active_tx(Arc::new(DisciplineTxHandler {
            discipline: disc.clone(),
            device: Arc::downgrade(dev),
        }));

        self.attachments.lock().insert(
            dev.ifindex(),
            Attachment {
                discipline: disc,
                vnic,
            },
        );
        Ok(())
    }

    /// Symmetric with [`Self::attach`]: restores the device's original
    /// transmit entry point, tears down the discipline's private state,
    /// and drops the VNIC.
    pub fn detach(&self, dev: &DeviceHandle) -> Result<()> {
        let _admin = dev.admin_mutex.lock();

        let attachment = self
            .attachments
            .lock()
            .remove(&dev.ifindex())
            .ok_or(Error::InvalidArgument)?;

        dev.restore_original_tx();
        attachment.discipline.detach(dev)?;
        Ok(())
    }

    pub fn attached_discipline(&self, ifindex: u32) -> Option<Arc<dyn Discipline>> {
        self.attachments.lock().get(&ifindex).map(|a| a.discipline.clone())
    }

    pub fn vnic(&self, ifindex: u32) -> Option<Arc<Vnic>> {
        self.attachments.lock().get(&ifindex).map(|a| a.vnic.clone())
    }

    /// The RTmac receive dispatcher: strips the 4-byte header and routes on
    /// `flags`/`type`. `dev` is the device the frame arrived on (resolved by
    /// the caller from `skb.ifindex` via [`DeviceRegistry::get_by_index`]
    /// before invoking this).
    pub fn receive(&self, dev: &DeviceHandle, mut skb: DefaultSkb) {
        let header = match RtmacHeader::decode(skb.payload()) {
            Ok(h) => h,
            Err(_) => {
                log::debug!("rtmac: frame shorter than header, dropping");
                return;
            }
        };
        if header.version != super::header::RTMAC_VERSION {
            log::debug!("rtmac: unexpected header version {}, dropping", header.version);
            return;
        }
        if skb.pull(HEADER_LEN).is_err() {
            log::debug!("rtmac: frame shorter than header, dropping");
            return;
        }

        let attachment_disc;
        let attachment_vnic;
        {
            let attachments = self.attachments.lock();
            let attachment = match attachments.get(&dev.ifindex()) {
                Some(a) => a,
                None => {
                    log::debug!("rtmac: no discipline attached to ifindex {}, dropping", dev.ifindex());
                    return;
                }
            };
            attachment_disc = attachment.discipline.clone();
            attachment_vnic = attachment.vnic.clone();
        }

        if header.flags.contains(HeaderFlags::TUNNEL) {
            attachment_vnic.tunnel_rx(header.disc_type, skb);
        } else if header.disc_type == attachment_disc.disc_type() {
            attachment_disc.packet_rx(skb, dev);
        } else {
            log::debug!(
                "rtmac: frame type {:#06x} does not match attached discipline, dropping",
                header.disc_type
            );
        }
    }
}

impl Default for MacLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRegistry;
    use crate::rtskb::{Pool, PoolRole, RTSKB_SIZE};
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct NullTx;
    impl TxHandler for NullTx {
        fn transmit(&self, _skb: DefaultSkb) -> Result<()> {
            Ok(())
        }
    }

    struct CountingDiscipline {
        attaches: AtomicUsize,
        detaches: AtomicUsize,
        rx_hits: AtomicUsize,
    }
    impl CountingDiscipline {
        fn new() -> Self {
            Self {
                attaches: AtomicUsize::new(0),
                detaches: AtomicUsize::new(0),
                rx_hits: AtomicUsize::new(0),
            }
        }
    }
    impl Discipline for CountingDiscipline {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn disc_type(&self) -> u16 {
            7
        }
        fn attach(&self, _dev: &DeviceHandle) -> Result<()> {
            self.attaches.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn detach(&self, _dev: &DeviceHandle) -> Result<()> {
            self.detaches.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn rt_packet_tx(&self, _skb: DefaultSkb, _dev: &DeviceHandle) -> Result<()> {
            Ok(())
        }
        fn nrt_packet_tx(&self, _skb: DefaultSkb, _dev: &DeviceHandle) -> Result<()> {
            Ok(())
        }
        fn mtu(&self, _dev: &DeviceHandle) -> u16 {
            1500
        }
        fn packet_rx(&self, _skb: DefaultSkb, _dev: &DeviceHandle) {
            self.rx_hits.fetch_add(1, Ordering::Relaxed);
        }
        fn as_any(&self) -> &dyn core::any::Any {
            self
        }
    }

    fn dev(registry: &DeviceRegistry, flags: DeviceFlags) -> DeviceHandle {
        registry
            .register("rteth0", [0; 6], 1500, flags, None, None, 0, Arc::new(NullTx))
            .unwrap()
    }

    #[test]
    fn attach_redirects_transmit_and_detach_restores_it() {
        let registry = DeviceRegistry::new();
        let device = dev(&registry, DeviceFlags::UP);
        let mac = MacLayer::new();
        let disc = Arc::new(CountingDiscipline::new());

        mac.attach(&device, disc.clone()).unwrap();
        assert_eq!(disc.attaches.load(Ordering::Relaxed), 1);
        assert!(mac.attached_discipline(device.ifindex()).is_some());

        mac.detach(&device).unwrap();
        assert_eq!(disc.detaches.load(Ordering::Relaxed), 1);
        assert!(mac.attached_discipline(device.ifindex()).is_none());
    }

    #[test]
    fn attach_twice_is_rejected() {
        let registry = DeviceRegistry::new();
        let device = dev(&registry, DeviceFlags::UP);
        let mac = MacLayer::new();
        mac.attach(&device, Arc::new(CountingDiscipline::new())).unwrap();
        assert!(matches!(
            mac.attach(&device, Arc::new(CountingDiscipline::new())),
            Err(Error::Busy)
        ));
    }

    #[test]
    fn attach_to_loopback_is_rejected() {
        let registry = DeviceRegistry::new();
        let device = dev(&registry, DeviceFlags::UP | DeviceFlags::LOOPBACK);
        let mac = MacLayer::new();
        assert!(matches!(
            mac.attach(&device, Arc::new(CountingDiscipline::new())),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn receive_routes_matching_type_to_packet_rx() {
        let registry = DeviceRegistry::new();
        let device = dev(&registry, DeviceFlags::UP);
        let mac = MacLayer::new();
        let disc = Arc::new(CountingDiscipline::new());
        mac.attach(&device, disc.clone()).unwrap();

        let pool = Pool::<RTSKB_SIZE>::new("test", PoolRole::Global, 1);
        let mut skb = pool.alloc().unwrap();
        skb.extend_from_slice(&RtmacHeader::new(7).encode()).unwrap();
        skb.extend_from_slice(&[0xaa, 0xbb]).unwrap();

        mac.receive(&device, skb);
        assert_eq!(disc.rx_hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn receive_tunnels_to_vnic_when_tunnel_flag_set() {
        let registry = DeviceRegistry::new();
        let device = dev(&registry, DeviceFlags::UP);
        let mac = MacLayer::new();
        let disc = Arc::new(CountingDiscipline::new());
        mac.attach(&device, disc).unwrap();

        let pool = Pool::<RTSKB_SIZE>::new("test", PoolRole::Global, 1);
        let mut skb = pool.alloc().unwrap();
        skb.extend_from_slice(&RtmacHeader::tunnel(0x0800).encode()).unwrap();
        skb.extend_from_slice(&[1, 2, 3]).unwrap();

        mac.receive(&device, skb);
        let vnic = mac.vnic(device.ifindex()).unwrap();
        assert_eq!(vnic.pending(), 1);
    }
}
