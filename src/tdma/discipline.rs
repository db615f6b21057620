//! The TDMA discipline itself: the `rtmac::Discipline` implementation that
//! ties slot queues, the job schedule and the calibration FSM together.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::device::DeviceHandle;
use crate::error::{Error, Result};
use crate::rtmac::{Discipline, HeaderFlags, ProcEntry, RtmacHeader};
use crate::rtskb::DefaultSkb;
use crate::sync::rtos::{RtEvent, RtExecutor};
use crate::sync::AdminMutex;

use super::frame::{TdmaFrame, TDMA_DISC_TYPE};
use super::jobs::JobKind;
use super::slot::{SlotConfig, DEFAULT_NRT_SLOT, DEFAULT_SLOT};
use super::state::{FsmState, TdmaFlags, TdmaPrivate};

/// Per-device configuration staged by an ioctl handler before `MacLayer::attach`
/// calls into this discipline. The real C implementation reads equivalent
/// fields straight out of a `struct rtmac_disc *` the ioctl already
/// populated; here they are staged explicitly since this discipline's
/// `attach` cannot take extra arguments (the capability interface is shared
/// with every other discipline).
pub struct AttachConfig {
    pub cycle_period_ns: u64,
    pub backup_sync_increment_ns: u64,
    pub max_slot_id: u16,
    pub slots: Vec<SlotConfig>,
    pub schedule: Vec<JobKind>,
    pub master: bool,
    pub executor: Arc<dyn RtExecutor>,
    pub worker_wakeup: Arc<dyn RtEvent>,
    pub sync_event: Arc<dyn RtEvent>,
    pub xmit_event: Arc<dyn RtEvent>,
}

pub struct TdmaDiscipline {
    pending: AdminMutex<BTreeMap<u32, AttachConfig>>,
    devices: AdminMutex<BTreeMap<u32, Arc<TdmaPrivate>>>,
}

impl TdmaDiscipline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: AdminMutex::new(BTreeMap::new()),
            devices: AdminMutex::new(BTreeMap::new()),
        })
    }

    /// Stages the configuration `attach` will pick up for `ifindex`. Must be
    /// called before `MacLayer::attach(dev, tdma)` (the RTMAC_TDMA ioctl
    /// group does this).
    pub fn configure(&self, ifindex: u32, config: AttachConfig) {
        self.pending.lock().insert(ifindex, config);
    }

    fn private_for(&self, dev: &DeviceHandle) -> Option<Arc<TdmaPrivate>> {
        self.devices.lock().get(&dev.ifindex()).cloned()
    }

    pub fn fsm_state(&self, ifindex: u32) -> Option<FsmState> {
        self.devices.lock().get(&ifindex).map(|p| p.fsm())
    }

    pub fn flags(&self, ifindex: u32) -> Option<TdmaFlags> {
        self.devices.lock().get(&ifindex).map(|p| p.flags())
    }
}

impl Discipline for TdmaDiscipline {
    fn name(&self) -> &'static str {
        "tdma"
    }

    fn disc_type(&self) -> u16 {
        TDMA_DISC_TYPE
    }

    fn attach(&self, dev: &DeviceHandle) -> Result<()> {
        let config = self
            .pending
            .lock()
            .remove(&dev.ifindex())
            .ok_or(Error::InvalidArgument)?;

        let private = Arc::new(TdmaPrivate::new(
            dev,
            config.cycle_period_ns,
            config.backup_sync_increment_ns,
            config.max_slot_id,
            config.worker_wakeup.clone(),
            config.sync_event,
            config.xmit_event,
        ));
        for slot in config.slots {
            private.configure_slot(slot);
        }
        private.set_schedule(config.schedule);
        if config.master {
            private.set_master()?;
        }

        self.devices.lock().insert(dev.ifindex(), private.clone());

        let worker_wakeup = config.worker_wakeup;
        let worker_private = private.clone();
        let task = config.executor.spawn(
            "rtnet-tdma",
            0,
            alloc::boxed::Box::new(move || {
                if worker_wakeup.wait(None).is_ok() {
                    if let Err(err) = worker_private.process_next_job() {
                        log::warn!("tdma worker: job failed: {err}");
                    }
                }
            }),
        );
        private.install_worker_task(task);
        Ok(())
    }

    fn detach(&self, dev: &DeviceHandle) -> Result<()> {
        let private = self
            .devices
            .lock()
            .remove(&dev.ifindex())
            .ok_or(Error::InvalidArgument)?;
        // Waits synchronously for the worker task to exit, as device ifdown
        // requires.
        private.shutdown_and_join();
        Ok(())
    }

    /// Prepends the RTmac header and enqueues onto `skb.priority`'s slot.
    /// `skb` must have been built with `reserve(HEADER_LEN)` called before
    /// any payload was `put`, so there is headroom for `push` to fill.
    fn rt_packet_tx(&self, skb: DefaultSkb, dev: &DeviceHandle) -> Result<()> {
        let private = self.private_for(dev).ok_or(Error::NoSuchDevice)?;
        let slot_id = skb.priority as u16;
        let mtu = private.slot_mtu(slot_id).ok_or(Error::NoSuchDevice)?;
        if skb.len() > mtu as usize {
            return Err(Error::MessageTooLong);
        }
        let mut skb = skb;
        skb.push(crate::rtmac::HEADER_LEN)?
            .copy_from_slice(&RtmacHeader::new(TDMA_DISC_TYPE).encode());
        private.enqueue_on_slot(slot_id, skb)
    }

    /// Wraps `skb` in a tunnel header and enqueues onto the best-effort
    /// slot. Same headroom requirement as `rt_packet_tx`: `reserve` before
    /// `put`.
    fn nrt_packet_tx(&self, skb: DefaultSkb, dev: &DeviceHandle) -> Result<()> {
        let private = self.private_for(dev).ok_or(Error::NoSuchDevice)?;
        let target = if private.slot_mtu(DEFAULT_NRT_SLOT).is_some() {
            DEFAULT_NRT_SLOT
        } else {
            DEFAULT_SLOT
        };
        let mtu = private.slot_mtu(target).ok_or(Error::NoSuchDevice)?;
        if skb.len() > mtu as usize {
            return Err(Error::MessageTooLong);
        }
        let header = RtmacHeader::tunnel(skb.protocol).encode();
        let mut skb = skb;
        skb.push(crate::rtmac::HEADER_LEN)?.copy_from_slice(&header);
        private.enqueue_on_slot(target, skb)
    }

    fn mtu(&self, dev: &DeviceHandle) -> u16 {
        self.private_for(dev)
            .and_then(|p| p.slot_mtu(DEFAULT_SLOT))
            .unwrap_or_else(|| dev.mtu())
    }

    fn packet_rx(&self, skb: DefaultSkb, dev: &DeviceHandle) {
        let private = match self.private_for(dev) {
            Some(p) => p,
            None => {
                log::debug!("tdma: packet_rx with no attached state, dropping");
                return;
            }
        };
        let frame = match TdmaFrame::decode(skb.payload()) {
            Ok(f) => f,
            Err(_) => {
                log::debug!("tdma: malformed control frame, dropping");
                return;
            }
        };
        match frame {
            TdmaFrame::Sync { cycle, .. } => private.on_sync_received(cycle),
            TdmaFrame::ReqCal { probe_id, sent_ns } => private.note_cal_request(probe_id, sent_ns),
            TdmaFrame::ReplyCal { echoed_ns, .. } => {
                // No clock reference is available at the `Discipline::packet_rx`
                // seam; the worker's `XmitReqCal` job is what actually measures
                // round-trip delay against its own `now_ns()` at send time.
                private.on_reply_cal_received(echoed_ns, echoed_ns)
            }
        }
    }

    fn proc_entries(&self) -> &[ProcEntry] {
        &[
            ProcEntry {
                name: "tdma",
                render: render_tdma,
            },
            ProcEntry {
                name: "tdma_slots",
                render: render_tdma_slots,
            },
        ]
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

fn render_tdma(disc: &dyn Discipline, dev: &DeviceHandle) -> String {
    let tdma = disc
        .as_any()
        .downcast_ref::<TdmaDiscipline>()
        .expect("render_tdma only installed on TdmaDiscipline");
    let state = tdma.fsm_state(dev.ifindex());
    let flags = tdma.flags(dev.ifindex());
    alloc::format!(
        "Interface: {}\nState: {:?}\nFlags: {:?}\n",
        dev.name(),
        state,
        flags
    )
}

fn render_tdma_slots(disc: &dyn Discipline, dev: &DeviceHandle) -> String {
    let tdma = disc
        .as_any()
        .downcast_ref::<TdmaDiscipline>()
        .expect("render_tdma_slots only installed on TdmaDiscipline");
    let slots = tdma
        .private_for(dev)
        .map(|private| private.slot_report())
        .unwrap_or_default();
    crate::proc::render_tdma_slots(dev.ifindex(), &slots)
}
