//! The packet buffer itself: a fixed-capacity byte region with four cursors.
//!
//! Mirrors `struct rtskb` from the original driver model, with the
//! queue/pool linkage pulled out into [`super::pool`] and the chain handled
//! by [`Chain`] rather than raw `next`/`chain_end` pointers.

use alloc::boxed::Box;

use crate::error::{Error, Result};

/// Where a received frame is headed: straight to this host, to everyone, or
/// to some other host entirely (promiscuous capture).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Host,
    Broadcast,
    OtherHost,
}

/// Checksum state carried alongside a buffer's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumState {
    #[default]
    Unknown,
    HardwareVerified,
    HardwareUnnecessary,
}

/// Byte offsets of the layer-2/3/4 headers within the buffer, set by whoever
/// parses them. `None` until the corresponding layer has been located.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderOffsets {
    pub mac: Option<usize>,
    pub network: Option<usize>,
    pub transport: Option<usize>,
}

/// Capture-tee bookkeeping: whether a capture hook wants this buffer kept
/// alive past its ordinary free point. The companion pool itself is
/// installed on the [`super::pool::Pool`], not per buffer; see
/// [`super::pool::Pool::install_capture_hook`] and [`super::pool::Pool::free`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureState {
    pub tee: bool,
}

/// Fixed-capacity backing storage plus metadata, boxed so that moving a
/// buffer between pool free-lists is a pointer swap, never a byte copy.
///
/// `buf_start` is always `0`: storage is a single owned array, and headroom
/// is obtained by advancing `data` past it, within the standing invariant
/// `buf_start ≤ data ≤ tail ≤ end`.
pub struct RtSkbData<const CAP: usize> {
    storage: Box<[u8; CAP]>,
    data: usize,
    tail: usize,
    end: usize,

    pub protocol: u16,
    pub class: PacketClass,
    pub priority: u8,
    pub rx_timestamp_ns: u64,
    pub checksum: ChecksumState,
    pub headers: HeaderOffsets,
    pub capture: CaptureState,
    /// ifindex of the device this buffer arrived on or is destined for.
    /// Set by `netif_rx` on receive; set by callers building a frame for
    /// transmit so discipline/dispatch code can resolve the owning device
    /// from the buffer alone.
    pub ifindex: Option<u32>,
}

impl<const CAP: usize> RtSkbData<CAP> {
    /// Builds a fresh buffer with `data = tail = buf_start = 0` and
    /// `end = CAP`, matching what `alloc` hands out.
    pub(super) fn new() -> Self {
        Self {
            storage: Box::new([0u8; CAP]),
            data: 0,
            tail: 0,
            end: CAP,
            protocol: 0,
            class: PacketClass::Host,
            priority: 0,
            rx_timestamp_ns: 0,
            checksum: ChecksumState::default(),
            headers: HeaderOffsets::default(),
            capture: CaptureState::default(),
            ifindex: None,
        }
    }

    /// Resets metadata and cursors to the just-allocated state, keeping the
    /// backing storage (and its allocation) for reuse. Called by the pool
    /// when a buffer is returned to a free-list, so that the next `alloc`
    /// hands out a buffer indistinguishable from a brand new one.
    pub(super) fn reset(&mut self) {
        self.data = 0;
        self.tail = 0;
        self.protocol = 0;
        self.class = PacketClass::Host;
        self.priority = 0;
        self.rx_timestamp_ns = 0;
        self.checksum = ChecksumState::default();
        self.headers = HeaderOffsets::default();
        self.capture = CaptureState::default();
        self.ifindex = None;
    }

    pub const fn capacity(&self) -> usize {
        CAP
    }

    pub const fn len(&self) -> usize {
        self.tail - self.data
    }

    pub const fn is_empty(&self) -> bool {
        self.data == self.tail
    }

    pub const fn headroom(&self) -> usize {
        self.data
    }

    pub const fn tailroom(&self) -> usize {
        self.end - self.tail
    }

    pub fn payload(&self) -> &[u8] {
        &self.storage[self.data..self.tail]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.data..self.tail]
    }

    /// Marks this buffer for the capture tee: when freed, it is handed to
    /// its pool's installed capture companion instead of back to its own
    /// free list. Installed by whatever receive-path hook wants a copy kept
    /// alive past the buffer's ordinary free point.
    pub fn mark_for_capture(&mut self) {
        self.capture.tee = true;
    }

    /// Advances `data` and `tail` together by `n` bytes on a freshly
    /// allocated buffer, carving out headroom before any payload is written.
    /// A later `push` can then move `data` back into this room to prepend a
    /// header. Only valid while the buffer is still empty; fails rather than
    /// reserving space that would shadow payload already written.
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        if !self.is_empty() || self.tail + n > self.end {
            diagnostic_bounds_violation("reserve", n, self.end - self.tail, CAP);
            return Err(Error::NoSpace);
        }
        self.data += n;
        self.tail += n;
        Ok(())
    }

    /// Moves `data` backwards by `n` bytes without changing `tail`,
    /// reserving header room. Fails rather than underflowing `buf_start`.
    pub fn push(&mut self, n: usize) -> Result<&mut [u8]> {
        if n > self.data {
            diagnostic_bounds_violation("push", n, self.data, CAP);
            return Err(Error::NoSpace);
        }
        self.data -= n;
        Ok(&mut self.storage[self.data..self.data + n])
    }

    /// Moves `data` forwards by `n` bytes, the inverse of [`Self::push`] and
    /// the usual way to strip a header already consumed by a parser.
    pub fn pull(&mut self, n: usize) -> Result<&mut [u8]> {
        if self.data + n > self.tail {
            diagnostic_bounds_violation("pull", n, self.tail - self.data, CAP);
            return Err(Error::NoSpace);
        }
        let start = self.data;
        self.data += n;
        Ok(&mut self.storage[start..start + n])
    }

    /// Moves `tail` forwards by `n` bytes, appending room for payload.
    pub fn put(&mut self, n: usize) -> Result<&mut [u8]> {
        if self.tail + n > self.end {
            diagnostic_bounds_violation("put", n, self.end - self.tail, CAP);
            return Err(Error::NoSpace);
        }
        let start = self.tail;
        self.tail += n;
        Ok(&mut self.storage[start..start + n])
    }

    /// Shrinks `tail` backwards by `n` bytes, the inverse of [`Self::put`].
    pub fn trim(&mut self, n: usize) -> Result<()> {
        if n > self.len() {
            diagnostic_bounds_violation("trim", n, self.len(), CAP);
            return Err(Error::NoSpace);
        }
        self.tail -= n;
        Ok(())
    }

    /// Appends `src` at `tail`, growing the buffer. Used by frame builders
    /// that assemble a wire format field by field.
    pub fn extend_from_slice(&mut self, src: &[u8]) -> Result<()> {
        let dst = self.put(src.len())?;
        dst.copy_from_slice(src);
        Ok(())
    }

    pub(super) fn copy_from(&mut self, other: &Self) {
        self.data = other.data;
        self.tail = other.tail;
        self.storage[other.data..other.tail].copy_from_slice(&other.storage[other.data..other.tail]);
        self.protocol = other.protocol;
        self.class = other.class;
        self.priority = other.priority;
        self.rx_timestamp_ns = other.rx_timestamp_ns;
        self.checksum = other.checksum;
        self.headers = other.headers;
        self.ifindex = other.ifindex;
    }
}

/// A programmer fault distinct from ordinary resource exhaustion: cursor
/// arithmetic that would run past `buf_start`/`end`. Bounds are checked
/// before any write, so the fault is reported by refusing the operation and
/// logging, never by panicking through a real-time path.
fn diagnostic_bounds_violation(op: &str, requested: usize, available: usize, cap: usize) {
    log::error!(
        "rtskb cursor violation: {op}({requested}) exceeds {available} bytes available (capacity {cap})"
    );
}
