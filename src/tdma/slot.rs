//! A single TDMA slot: its timing parameters and bounded local transmit
//! queue.

use heapless::Deque;

use crate::rtskb::DefaultSkb;

/// How many frames a slot's local queue holds before `rt_packet_tx` starts
/// dropping tail. Fixed-capacity and allocation-free: allocator calls are
/// forbidden on the real-time enqueue path.
pub const SLOT_QUEUE_DEPTH: usize = 8;

/// Identifies the default best-effort slot used by `nrt_packet_tx` when no
/// dedicated NRT slot has been configured.
pub const DEFAULT_SLOT: u16 = 0;

/// The slot `nrt_packet_tx` prefers, if configured.
pub const DEFAULT_NRT_SLOT: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    pub id: u16,
    pub offset_ns: u64,
    pub mtu: u16,
    /// The slot repeats its ownership every `period` cycles.
    pub period: u32,
    /// Initial offset, in cycles, into that repeating pattern.
    pub phasing: u32,
    /// When set, this slot shares its physical transmit queue with the
    /// named slot id — frames enqueued under either id drain from one
    /// queue in FIFO order, as joint slots require.
    pub joint_with: Option<u16>,
}

pub struct Slot {
    pub config: SlotConfig,
    queue: Deque<DefaultSkb, SLOT_QUEUE_DEPTH>,
}

impl Slot {
    pub fn new(config: SlotConfig) -> Self {
        Self {
            config,
            queue: Deque::new(),
        }
    }

    /// Whether `cycle` is one in which this slot's owner may transmit,
    /// given its `period`/`phasing`.
    pub fn owns_cycle(&self, cycle: u64) -> bool {
        let period = self.config.period.max(1) as u64;
        let phasing = self.config.phasing as u64 % period;
        cycle % period == phasing
    }

    /// Appends a frame, dropping it (drop-tail) if the queue is full.
    /// Never blocks and never allocates.
    pub fn enqueue(&mut self, skb: DefaultSkb) -> Result<(), DefaultSkb> {
        self.queue.push_back(skb)
    }

    pub fn dequeue(&mut self) -> Option<DefaultSkb> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
