//! Pools of [`RtSkbData`] buffers, and the owned handle ([`RtSkb`]) callers
//! actually hold.
//!
//! Grounded in `stack/rtskb.c`'s `rtskb_pool_extend`/`rtskb_pool_shrink`
//! (non-real-time growth/shrink outside the hot path) and `rtskb_acquire`
//! (the pool-reference swap below). The original links raw `struct rtskb *`
//! nodes through an intrusive list; here a buffer's identity is a
//! `Box<RtSkbData<CAP>>`, so "moving a buffer between pools" is a pointer
//! move through a `VecDeque`, never a copy of its payload.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;

use crate::error::{Error, Result};
use crate::sync::IrqSpinlock;

use super::buffer::RtSkbData;

/// What a pool is for. Only used for reporting and for choosing sensible
/// defaults — the mechanics of alloc/free/acquire are identical across
/// roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRole {
    /// Shared fallback drawn on when a more specific pool is empty.
    Global,
    /// Refill reserve for one device's receive ring.
    Device,
    /// Fixed reserve dedicated to one subsystem (e.g. RTcfg).
    Protocol,
}

struct PoolInner<const CAP: usize> {
    free: VecDeque<Box<RtSkbData<CAP>>>,
    /// Buffers handed out but not yet returned. Used only for the checked
    /// leak-detection balance counter; never consulted on the alloc/free
    /// fast path.
    outstanding: usize,
    high_water: usize,
}

/// An intrusive LIFO/FIFO of preallocated buffers plus a lock and balance
/// counters.
pub struct Pool<const CAP: usize> {
    name: String,
    role: PoolRole,
    inner: IrqSpinlock<PoolInner<CAP>>,
    /// Companion pool installed by [`Self::install_capture_hook`]; a buffer
    /// freed with its capture tee set is handed here instead of back to its
    /// own free list.
    capture_hook: IrqSpinlock<Option<Arc<Pool<CAP>>>>,
}

impl<const CAP: usize> Pool<CAP> {
    /// Allocates `size` buffers up front, as `rtskb_pool_init` does. Must
    /// not be called from the real-time path — it calls the allocator
    /// `size` times.
    pub fn new(name: impl Into<String>, role: PoolRole, size: usize) -> Arc<Self> {
        let mut free = VecDeque::with_capacity(size);
        for _ in 0..size {
            free.push_back(Box::new(RtSkbData::new()));
        }
        Arc::new(Self {
            name: name.into(),
            role,
            inner: IrqSpinlock::new(PoolInner {
                free,
                outstanding: 0,
                high_water: 0,
            }),
            capture_hook: IrqSpinlock::new(None),
        })
    }

    /// Installs (or replaces) this pool's capture companion. From then on,
    /// a buffer freed with [`RtSkbData::mark_for_capture`] set is handed to
    /// `companion`'s free list instead of this pool's own, and this pool is
    /// refilled from `companion` so neither pool's size drifts across
    /// repeated capture cycles.
    pub fn install_capture_hook(&self, companion: Arc<Pool<CAP>>) {
        *self.capture_hook.lock() = Some(companion);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> PoolRole {
        self.role
    }

    /// Adds `n` freshly allocated buffers to the pool's free list. Only
    /// valid outside the real-time path (`rtskb_pool_extend`).
    pub fn extend(&self, n: usize) {
        let mut inner = self.inner.lock();
        for _ in 0..n {
            inner.free.push_back(Box::new(RtSkbData::new()));
        }
    }

    /// Removes up to `n` buffers from the free list and drops them
    /// (`rtskb_pool_shrink`). Returns the number actually removed — fewer
    /// than requested if buffers are currently on loan.
    pub fn shrink(&self, n: usize) -> usize {
        let mut inner = self.inner.lock();
        let removed = n.min(inner.free.len());
        for _ in 0..removed {
            inner.free.pop_back();
        }
        removed
    }

    /// Current counts for the `/rtnet/rtskb` proc-style report.
    pub fn stats(self: &Arc<Self>) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            free: inner.free.len(),
            outstanding: inner.outstanding,
            high_water: inner.high_water,
        }
    }

    /// Hands out a fresh buffer: `data = tail = buf_start = 0`,
    /// `end = CAP`, class `Host`. Never blocks, never calls the allocator;
    /// fails with [`Error::OutOfBuffers`] if the free list is empty.
    pub fn alloc(self: &Arc<Self>) -> Result<RtSkb<CAP>> {
        let mut raw = {
            let mut inner = self.inner.lock();
            let raw = inner.free.pop_front().ok_or(Error::OutOfBuffers)?;
            inner.outstanding += 1;
            inner.high_water = inner.high_water.max(inner.outstanding);
            raw
        };
        raw.reset();
        Ok(RtSkb {
            data: raw,
            pool: self.clone(),
            next: None,
        })
    }

    /// Returns `buf` to `buf`'s currently recorded pool (which, after an
    /// [`Pool::acquire`], may not be `self`). Consumes the handle; any chain
    /// linked from it is freed member by member, each member to its own
    /// recorded pool.
    ///
    /// If the buffer's capture tee is set and its pool has a capture
    /// companion installed, the buffer is handed to the companion's free
    /// list instead, and the pool it actually came from is refilled from the
    /// companion — so a capture listener gets first-class ownership of the
    /// buffer without either pool's free count drifting.
    pub fn free(buf: RtSkb<CAP>) {
        let RtSkb { data, pool, next } = buf;
        if let Some(chained) = next {
            Self::free(*chained);
        }
        if data.capture.tee {
            if let Some(companion) = pool.capture_hook.lock().clone() {
                let replacement = companion.inner.lock().free.pop_front();
                if let Some(replacement) = replacement {
                    companion.inner.lock().free.push_back(data);
                    let mut inner = pool.inner.lock();
                    inner.outstanding = inner.outstanding.saturating_sub(1);
                    inner.free.push_back(replacement);
                    return;
                }
                log::warn!("rtskb: capture companion pool empty, falling back to ordinary free");
            }
        }
        let mut inner = pool.inner.lock();
        inner.outstanding = inner.outstanding.saturating_sub(1);
        inner.free.push_back(data);
    }

    /// Reassigns `buf`'s recorded pool to `self` ("companion pool"),
    /// charging the swap to `self` without touching the allocator.
    ///
    /// A fresh buffer is dequeued from `self`'s free list, retagged with
    /// `buf`'s *previous* pool, and pushed onto that pool's free list as an
    /// immediate refill; `buf` itself is then retagged with `self`. Fails
    /// with [`Error::OutOfBuffers`] if `self` has nothing free, leaving
    /// `buf` untouched.
    pub fn acquire(self: &Arc<Self>, buf: &mut RtSkb<CAP>) -> Result<()> {
        let mut companion = {
            let mut inner = self.inner.lock();
            let companion = inner.free.pop_front().ok_or(Error::OutOfBuffers)?;
            inner.outstanding += 1;
            inner.high_water = inner.high_water.max(inner.outstanding);
            companion
        };
        companion.reset();

        let release_pool = core::mem::replace(&mut buf.pool, self.clone());
        {
            let mut inner = release_pool.inner.lock();
            inner.outstanding = inner.outstanding.saturating_sub(1);
            inner.free.push_back(companion);
        }
        Ok(())
    }

    /// Copies cursors and the `data..tail` payload into a freshly allocated
    /// buffer drawn from `self`. Metadata other than protocol/class/
    /// priority/checksum/headers is left at the fresh-allocation default —
    /// transmit-stamp hooks and capture state never propagate to a clone.
    pub fn clone_from(self: &Arc<Self>, source: &RtSkb<CAP>) -> Result<RtSkb<CAP>> {
        let mut out = self.alloc()?;
        out.data.copy_from(&source.data);
        Ok(out)
    }
}

/// Snapshot of a pool's free/outstanding/high-water counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub free: usize,
    pub outstanding: usize,
    pub high_water: usize,
}

/// The owned packet-buffer handle callers hold: storage and cursors
/// ([`RtSkbData`]), the pool it is currently charged against, and an
/// optional chain continuation.
///
/// Dropping a handle without calling [`Pool::free`] simply leaks it back to
/// no pool — callers on the real-time path are expected to explicitly free
/// or hand buffers off (to a queue, to `acquire`, to a chain), an explicit
/// `free(buf)` contract rather than silent RAII.
pub struct RtSkb<const CAP: usize> {
    data: Box<RtSkbData<CAP>>,
    pool: Arc<Pool<CAP>>,
    next: Option<Box<RtSkb<CAP>>>,
}

impl<const CAP: usize> RtSkb<CAP> {
    pub fn pool(&self) -> &Arc<Pool<CAP>> {
        &self.pool
    }

    /// Links `tail` after `self`, forming (or extending) a chain freed in a
    /// single [`Pool::free`] call on the head.
    pub fn chain(&mut self, tail: RtSkb<CAP>) {
        match &mut self.next {
            Some(next) => next.chain(tail),
            None => self.next = Some(Box::new(tail)),
        }
    }

    pub fn chain_len(&self) -> usize {
        let mut len = 1;
        let mut cur = &self.next;
        while let Some(n) = cur {
            len += 1;
            cur = &n.next;
        }
        len
    }
}

impl<const CAP: usize> core::ops::Deref for RtSkb<CAP> {
    type Target = RtSkbData<CAP>;
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<const CAP: usize> core::ops::DerefMut for RtSkb<CAP> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_hands_out_fresh_buffer_and_underflows_cleanly() {
        let pool = Pool::<64>::new("test", PoolRole::Global, 1);
        let a = pool.alloc().unwrap();
        assert_eq!(a.len(), 0);
        assert!(matches!(pool.alloc(), Err(Error::OutOfBuffers)));
        Pool::free(a);
        assert!(pool.alloc().is_ok());
    }

    #[test]
    fn free_returns_to_currently_recorded_pool_not_origin() {
        let origin = Pool::<64>::new("origin", PoolRole::Device, 1);
        let other = Pool::<64>::new("other", PoolRole::Device, 1);

        let mut buf = origin.alloc().unwrap();
        assert_eq!(origin.stats().free, 0);

        other.acquire(&mut buf).unwrap();
        assert!(Arc::ptr_eq(buf.pool(), &other));
        // the companion refilled origin's free list
        assert_eq!(origin.stats().free, 1);
        assert_eq!(other.stats().free, 0);

        Pool::free(buf);
        assert_eq!(other.stats().free, 1);
        assert_eq!(origin.stats().free, 1);
    }

    #[test]
    fn acquire_fails_when_companion_pool_empty_and_leaves_buf_untouched() {
        let origin = Pool::<64>::new("origin", PoolRole::Device, 1);
        let empty = Pool::<64>::new("empty", PoolRole::Protocol, 0);

        let mut buf = origin.alloc().unwrap();
        assert!(matches!(empty.acquire(&mut buf), Err(Error::OutOfBuffers)));
        assert!(Arc::ptr_eq(buf.pool(), &origin));
    }

    #[test]
    fn clone_copies_payload_into_new_buffer_from_named_pool() {
        let src_pool = Pool::<64>::new("src", PoolRole::Global, 1);
        let dst_pool = Pool::<64>::new("dst", PoolRole::Global, 1);

        let mut original = src_pool.alloc().unwrap();
        original.put(4).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        original.protocol = 0x0800;

        let cloned = dst_pool.clone_from(&original).unwrap();
        assert_eq!(cloned.payload(), &[1, 2, 3, 4]);
        assert_eq!(cloned.protocol, 0x0800);
        assert!(Arc::ptr_eq(cloned.pool(), &dst_pool));
    }

    #[test]
    fn chain_free_returns_every_member_to_its_own_pool() {
        let pool_a = Pool::<64>::new("a", PoolRole::Global, 1);
        let pool_b = Pool::<64>::new("b", PoolRole::Global, 1);

        let mut head = pool_a.alloc().unwrap();
        let tail = pool_b.alloc().unwrap();
        head.chain(tail);
        assert_eq!(head.chain_len(), 2);

        Pool::free(head);
        assert_eq!(pool_a.stats().free, 1);
        assert_eq!(pool_b.stats().free, 1);
    }

    #[test]
    fn extend_and_shrink_adjust_free_count_outside_hot_path() {
        let pool = Pool::<64>::new("resizable", PoolRole::Global, 2);
        pool.extend(3);
        assert_eq!(pool.stats().free, 5);
        assert_eq!(pool.shrink(10), 5);
        assert_eq!(pool.stats().free, 0);
    }

    #[test]
    fn capture_tee_swap_keeps_both_pools_at_their_initial_size() {
        let device = Pool::<64>::new("device", PoolRole::Device, 4);
        let capture = Pool::<64>::new("capture", PoolRole::Protocol, 4);
        device.install_capture_hook(capture.clone());

        for _ in 0..1000 {
            let mut buf = device.alloc().unwrap();
            buf.mark_for_capture();
            Pool::free(buf);
        }

        assert_eq!(device.stats().free, 4);
        assert_eq!(capture.stats().free, 4);
        assert_eq!(device.stats().outstanding, 0);
        assert_eq!(capture.stats().outstanding, 0);
    }

    #[test]
    fn capture_tee_falls_back_to_ordinary_free_when_companion_empty() {
        let device = Pool::<64>::new("device", PoolRole::Device, 1);
        let capture = Pool::<64>::new("capture", PoolRole::Protocol, 0);
        device.install_capture_hook(capture.clone());

        let mut buf = device.alloc().unwrap();
        buf.mark_for_capture();
        Pool::free(buf);

        assert_eq!(device.stats().free, 1);
        assert_eq!(capture.stats().free, 0);
    }

    #[test]
    fn high_water_tracks_peak_outstanding() {
        let pool = Pool::<64>::new("watch", PoolRole::Global, 2);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_eq!(pool.stats().high_water, 2);
        Pool::free(a);
        Pool::free(b);
        assert_eq!(pool.stats().high_water, 2);
        assert_eq!(pool.stats().outstanding, 0);
    }
}
