//! Preallocated packet buffers and the pools they are drawn from.
//!
//! Grounded in `stack/rtskb.c`: buffers are never allocated or freed through
//! a general allocator on the real-time path, only exchanged between pools'
//! free lists.

mod buffer;
mod pool;

pub use buffer::{CaptureState, ChecksumState, HeaderOffsets, PacketClass, RtSkbData};
pub use pool::{Pool, PoolRole, PoolStats, RtSkb};

/// Upper bound on a buffer's payload, sized for a full Ethernet frame plus
/// the 2-byte RTmac header the TDMA/RTmac transmit hooks prepend. Callers
/// allocating with [`Pool::alloc`] must keep their `put`/`push` total within
/// this bound; the four-cursor invariant in [`RtSkbData`] enforces it per
/// buffer regardless of which pool it came from.
pub const RTSKB_SIZE: usize = 1600;

/// The buffer and pool types used everywhere outside this module's own
/// generic unit tests.
pub type DefaultSkb = RtSkb<RTSKB_SIZE>;
pub type DefaultPool = Pool<RTSKB_SIZE>;
