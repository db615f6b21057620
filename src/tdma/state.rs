//! Per-device TDMA state: the attach-time private block, the master/slave
//! state machine, and the calibration exchange.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use core::time::Duration;

use crate::device::DeviceRecord;
use crate::error::{Error, Result};
use crate::rtskb::{DefaultPool, DefaultSkb};
use crate::sync::rtos::{RtEvent, RtTask};

use super::jobs::{JobKind, JobSchedule};
use super::slot::{Slot, SlotConfig};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TdmaFlags: u32 {
        const MASTER         = 0b00001;
        const BACKUP_MASTER  = 0b00010;
        const BACKUP_ACTIVE  = 0b00100;
        const CALIBRATED     = 0b01000;
        const SHUTDOWN       = 0b10000;
    }
}

/// The per-device master/slave calibration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Seeking,
    MasterActive,
    CalPending,
    Calibrated,
    BackupActive,
    Terminal,
}

/// How long a slave waits for a `ReplyCal` before giving up calibration
/// for the current cycle. TDMA calibration gives up after one cycle rather
/// than retrying indefinitely.
pub const CALIBRATION_TIMEOUT: Duration = Duration::from_millis(50);

struct Mutable {
    fsm: FsmState,
    flags: TdmaFlags,
    slots: BTreeMap<u16, Slot>,
    jobs: JobSchedule,
    cycle: u64,
    /// Set by `packet_rx` when a `ReqCal` arrives; consumed by the next
    /// `ReplyCal` job, which is a no-op if nothing is pending.
    pending_cal_reply: Option<(u32, u64)>,
    /// Slave-side round-trip correction applied to the local clock.
    slot_offset_correction_ns: i64,
}

/// Sanity tag stored alongside every private block, checked before trusting
/// a slot table. Corruption detected by magic mismatch is treated as a
/// permanent fault, not a retryable one.
pub const TDMA_MAGIC: u32 = 0x7454_444d;

/// Everything this discipline tracks for one attached device.
pub struct TdmaPrivate {
    pub magic: u32,
    device: Weak<DeviceRecord>,
    pub cycle_period_ns: u64,
    pub backup_sync_increment_ns: u64,
    pub max_slot_id: u16,
    worker_wakeup: Arc<dyn RtEvent>,
    sync_event: Arc<dyn RtEvent>,
    /// Reserved for a future driver transmit-complete handshake; the
    /// worker loop implemented here never waits on it.
    #[allow(dead_code)]
    xmit_event: Arc<dyn RtEvent>,
    /// Dedicated pool for TDMA's own control frames (SYNC/REQ_CAL/
    /// REPLY_CAL), preallocated at attach time so the worker never calls
    /// the allocator while building one.
    ctrl_pool: Arc<DefaultPool>,
    mutable: crate::sync::IrqSpinlock<Mutable>,
    /// The worker task spawned for this device, set once by `attach` after
    /// construction (the closure it runs needs an `Arc` to this struct) and
    /// taken and joined by `detach`.
    worker_task: crate::sync::IrqSpinlock<Option<Box<dyn RtTask>>>,
}

impl TdmaPrivate {
    pub fn new(
        device: &crate::device::DeviceHandle,
        cycle_period_ns: u64,
        backup_sync_increment_ns: u64,
        max_slot_id: u16,
        worker_wakeup: Arc<dyn RtEvent>,
        sync_event: Arc<dyn RtEvent>,
        xmit_event: Arc<dyn RtEvent>,
    ) -> Self {
        Self {
            magic: TDMA_MAGIC,
            device: Arc::downgrade(device),
            cycle_period_ns,
            backup_sync_increment_ns,
            max_slot_id,
            worker_wakeup,
            sync_event,
            xmit_event,
            ctrl_pool: crate::rtskb::Pool::new("tdma-ctrl", crate::rtskb::PoolRole::Protocol, 4),
            mutable: crate::sync::IrqSpinlock::new(Mutable {
                fsm: FsmState::Seeking,
                flags: TdmaFlags::empty(),
                slots: BTreeMap::new(),
                jobs: JobSchedule::new(alloc::vec::Vec::new()),
                cycle: 0,
                pending_cal_reply: None,
                slot_offset_correction_ns: 0,
            }),
            worker_task: crate::sync::IrqSpinlock::new(None),
        }
    }

    /// Stores the worker task handle spawned for this device. Called once,
    /// immediately after construction, by the discipline's `attach`.
    pub fn install_worker_task(&self, task: Box<dyn RtTask>) {
        *self.worker_task.lock() = Some(task);
    }

    /// Requests shutdown and waits synchronously for the worker task to
    /// exit, as device ifdown requires. A no-op if no task was ever
    /// installed or it has already been taken.
    pub fn shutdown_and_join(&self) {
        self.request_shutdown();
        self.worker_wakeup.signal();
        if let Some(task) = self.worker_task.lock().take() {
            task.join();
        }
    }

    pub fn fsm(&self) -> FsmState {
        self.mutable.lock().fsm
    }

    pub fn flags(&self) -> TdmaFlags {
        self.mutable.lock().flags
    }

    pub fn is_sane(&self) -> bool {
        self.magic == TDMA_MAGIC
    }

    fn device_handle(&self) -> Result<crate::device::DeviceHandle> {
        self.device.upgrade().ok_or(Error::NoSuchDevice)
    }

    /// Registers or replaces a slot. Non-real-time only (ioctl path).
    pub fn configure_slot(&self, config: SlotConfig) {
        let mut m = self.mutable.lock();
        m.slots.insert(config.id, Slot::new(config));
    }

    /// Installs the static job sequence the worker steps through.
    /// Non-real-time only.
    pub fn set_schedule(&self, jobs: alloc::vec::Vec<JobKind>) {
        self.mutable.lock().jobs = JobSchedule::new(jobs);
    }

    /// `SEEKING ──(master role ioctl)──▶ MASTER_ACTIVE`.
    pub fn set_master(&self) -> Result<()> {
        let mut m = self.mutable.lock();
        if m.fsm != FsmState::Seeking {
            return Err(Error::InvalidArgument);
        }
        m.fsm = FsmState::MasterActive;
        m.flags.insert(TdmaFlags::MASTER);
        Ok(())
    }

    /// `SEEKING ──(SYNC frame received)──▶ CAL_PENDING`. Called by
    /// `packet_rx` on the slave side; re-synchronizes the epoch if already
    /// past this point, since the master re-emits SYNC every cycle.
    pub fn on_sync_received(&self, cycle: u64) {
        let mut m = self.mutable.lock();
        if m.fsm == FsmState::Seeking {
            m.fsm = FsmState::CalPending;
        }
        m.cycle = cycle;
    }

    /// `CAL_PENDING ──(REPLY_CAL received)──▶ CALIBRATED`.
    pub fn on_reply_cal_received(&self, echoed_ns: u64, now_ns: u64) {
        let mut m = self.mutable.lock();
        if m.fsm == FsmState::CalPending {
            m.fsm = FsmState::Calibrated;
            m.flags.insert(TdmaFlags::CALIBRATED);
        }
        m.slot_offset_correction_ns = now_ns as i64 - echoed_ns as i64;
        drop(m);
        self.sync_event.signal();
    }

    /// `CALIBRATED ──(SHUTDOWN flag)──▶ TERMINAL`.
    pub fn request_shutdown(&self) {
        let mut m = self.mutable.lock();
        m.flags.insert(TdmaFlags::SHUTDOWN);
        m.fsm = FsmState::Terminal;
    }

    /// `MASTER_ACTIVE ──(BACKUP_MASTER && sync lost)──▶ BACKUP_ACTIVE`.
    pub fn on_sync_lost(&self) {
        let mut m = self.mutable.lock();
        if m.fsm == FsmState::MasterActive && m.flags.contains(TdmaFlags::BACKUP_MASTER) {
            m.fsm = FsmState::BackupActive;
            m.flags.insert(TdmaFlags::BACKUP_ACTIVE);
        }
    }

    /// Called by `packet_rx` when a `ReqCal` arrives: stashes what the next
    /// `ReplyCal` job should echo.
    pub fn note_cal_request(&self, probe_id: u32, sent_ns: u64) {
        self.mutable.lock().pending_cal_reply = Some((probe_id, sent_ns));
    }

    /// Enqueues `skb` onto the slot `slot_id` owns (or its joint partner's
    /// queue). Drop-tail on overflow, as slot queues always are.
    pub fn enqueue_on_slot(&self, slot_id: u16, skb: DefaultSkb) -> Result<()> {
        let mut m = self.mutable.lock();
        let target = m.slots.get(&slot_id).and_then(|s| s.config.joint_with).unwrap_or(slot_id);
        let slot = m.slots.get_mut(&target).ok_or(Error::NoSuchDevice)?;
        slot.enqueue(skb).map_err(|_| Error::NoSpace)
    }

    pub fn slot_mtu(&self, slot_id: u16) -> Option<u16> {
        self.mutable.lock().slots.get(&slot_id).map(|s| s.config.mtu)
    }

    /// `(slot id, offset_ns, mtu)` for every configured slot, for the
    /// `/rtnet/tdma_slots` report.
    pub fn slot_report(&self) -> alloc::vec::Vec<(u16, u64, u16)> {
        self.mutable
            .lock()
            .slots
            .values()
            .map(|s| (s.config.id, s.config.offset_ns, s.config.mtu))
            .collect()
    }

    pub fn worker_wakeup_event(&self) -> Arc<dyn RtEvent> {
        self.worker_wakeup.clone()
    }

    /// The body of one worker-task wakeup: pulls the next scheduled job and
    /// executes it to completion before returning. Jobs are processed one
    /// at a time, never overlapping.
    pub fn process_next_job(&self) -> Result<()> {
        if !self.is_sane() {
            self.request_shutdown();
            log::error!("tdma: private-state magic corrupted, shutting down");
            return Err(Error::InvalidArgument);
        }
        let dev = self.device_handle()?;
        let job = {
            let mut m = self.mutable.lock();
            match m.jobs.next() {
                Some(j) => j,
                None => return Ok(()),
            }
        };

        match job {
            JobKind::Slot(id) => {
                let frame = {
                    let mut m = self.mutable.lock();
                    m.slots.get_mut(&id).and_then(Slot::dequeue)
                };
                if let Some(frame) = frame {
                    dev.original_tx().transmit(frame)?;
                }
                Ok(())
            }
            JobKind::Sync => {
                if !self.flags().contains(TdmaFlags::MASTER) {
                    return Ok(());
                }
                let cycle = self.mutable.lock().cycle;
                self.transmit_control(&dev, super::frame::TdmaFrame::Sync {
                    epoch_ns: 0,
                    cycle,
                })
            }
            JobKind::ReplyCal => {
                let pending = self.mutable.lock().pending_cal_reply.take();
                if let Some((probe_id, sent_ns)) = pending {
                    self.transmit_control(&dev, super::frame::TdmaFrame::ReplyCal {
                        probe_id,
                        echoed_ns: sent_ns,
                    })
                } else {
                    Ok(())
                }
            }
            JobKind::XmitReqCal => {
                self.transmit_control(&dev, super::frame::TdmaFrame::ReqCal {
                    probe_id: self.mutable.lock().cycle as u32,
                    sent_ns: 0,
                })?;
                match self.sync_event.wait(Some(CALIBRATION_TIMEOUT)) {
                    Ok(()) => Ok(()),
                    Err(_) => {
                        log::debug!("tdma: calibration timed out this cycle");
                        Ok(())
                    }
                }
            }
        }
    }

    fn transmit_control(&self, dev: &crate::device::DeviceHandle, frame: super::frame::TdmaFrame) -> Result<()> {
        let mut skb = self.ctrl_pool.alloc()?;
        skb.extend_from_slice(&crate::rtmac::RtmacHeader::new(super::frame::TDMA_DISC_TYPE).encode())?;
        skb.extend_from_slice(&frame.encode())?;
        dev.original_tx().transmit(skb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceFlags, DeviceRegistry};
    use crate::sync::rtos::TestEvent;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTx(AtomicUsize);
    impl crate::device::TxHandler for CountingTx {
        fn transmit(&self, _skb: DefaultSkb) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn attached_device(registry: &DeviceRegistry) -> crate::device::DeviceHandle {
        registry
            .register(
                "tap0",
                [0; 6],
                1500,
                DeviceFlags::UP,
                None,
                None,
                0,
                Arc::new(CountingTx(AtomicUsize::new(0))),
            )
            .unwrap()
    }

    fn events() -> (Arc<dyn RtEvent>, Arc<dyn RtEvent>, Arc<dyn RtEvent>) {
        (
            Arc::new(TestEvent::new()),
            Arc::new(TestEvent::new()),
            Arc::new(TestEvent::new()),
        )
    }

    #[test]
    fn set_master_then_shutdown_follows_the_diagram() {
        let registry = DeviceRegistry::new();
        let dev = attached_device(&registry);
        let (w, s, x) = events();
        let priv_state = TdmaPrivate::new(&dev, 1_000_000, 0, 8, w, s, x);
        assert_eq!(priv_state.fsm(), FsmState::Seeking);
        priv_state.set_master().unwrap();
        assert_eq!(priv_state.fsm(), FsmState::MasterActive);
        assert!(priv_state.flags().contains(TdmaFlags::MASTER));
        priv_state.request_shutdown();
        assert_eq!(priv_state.fsm(), FsmState::Terminal);
    }

    #[test]
    fn master_cannot_be_set_twice() {
        let registry = DeviceRegistry::new();
        let dev = attached_device(&registry);
        let (w, s, x) = events();
        let priv_state = TdmaPrivate::new(&dev, 1_000_000, 0, 8, w, s, x);
        priv_state.set_master().unwrap();
        assert!(priv_state.set_master().is_err());
    }

    #[test]
    fn slave_calibration_sequence_reaches_calibrated() {
        let registry = DeviceRegistry::new();
        let dev = attached_device(&registry);
        let (w, s, x) = events();
        let priv_state = TdmaPrivate::new(&dev, 1_000_000, 0, 8, w, s, x);
        priv_state.on_sync_received(3);
        assert_eq!(priv_state.fsm(), FsmState::CalPending);
        priv_state.on_reply_cal_received(100, 150);
        assert_eq!(priv_state.fsm(), FsmState::Calibrated);
        assert!(priv_state.flags().contains(TdmaFlags::CALIBRATED));
    }

    #[test]
    fn sync_lost_demotes_backup_master_to_backup_active() {
        let registry = DeviceRegistry::new();
        let dev = attached_device(&registry);
        let (w, s, x) = events();
        let priv_state = TdmaPrivate::new(&dev, 1_000_000, 0, 8, w, s, x);
        priv_state.set_master().unwrap();
        priv_state.mutable.lock().flags.insert(TdmaFlags::BACKUP_MASTER);
        priv_state.on_sync_lost();
        assert_eq!(priv_state.fsm(), FsmState::BackupActive);
    }

    #[test]
    fn master_sync_job_transmits_a_control_frame() {
        let registry = DeviceRegistry::new();
        let dev = attached_device(&registry);
        let (w, s, x) = events();
        let priv_state = TdmaPrivate::new(&dev, 1_000_000, 0, 8, w, s, x);
        priv_state.set_master().unwrap();
        priv_state.set_schedule(alloc::vec![JobKind::Sync]);
        priv_state.process_next_job().unwrap();
    }

    #[test]
    fn slot_job_drains_queued_frame_to_the_driver() {
        let registry = DeviceRegistry::new();
        let dev = attached_device(&registry);
        let (w, s, x) = events();
        let priv_state = TdmaPrivate::new(&dev, 1_000_000, 0, 8, w, s, x);
        priv_state.configure_slot(SlotConfig {
            id: 0,
            offset_ns: 0,
            mtu: 200,
            period: 1,
            phasing: 0,
            joint_with: None,
        });
        let pool = crate::rtskb::Pool::<{ crate::rtskb::RTSKB_SIZE }>::new(
            "t",
            crate::rtskb::PoolRole::Global,
            1,
        );
        priv_state.enqueue_on_slot(0, pool.alloc().unwrap()).unwrap();
        priv_state.set_schedule(alloc::vec![JobKind::Slot(0)]);
        priv_state.process_next_job().unwrap();
    }

    #[test]
    fn corrupted_magic_shuts_down_instead_of_running_jobs() {
        let registry = DeviceRegistry::new();
        let dev = attached_device(&registry);
        let (w, s, x) = events();
        let mut priv_state = TdmaPrivate::new(&dev, 1_000_000, 0, 8, w, s, x);
        priv_state.magic = 0xdead_beef;
        assert!(priv_state.process_next_job().is_err());
        assert_eq!(priv_state.fsm(), FsmState::Terminal);
    }
}
