//! A busy-wait, interrupt-safe lock.
//!
//! A ticket-lock design (fair, O(1) unlock, no allocator involved), with the
//! ISR-safety discipline of a `critical_section::with` guard added around the
//! ticket wait so a real-time spinlock can be shared with an interrupt
//! handler without the two deadlocking each other on the same core.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

/// A fair, busy-waiting lock suitable for the real-time hot path.
///
/// With the `critical-section` feature enabled, acquiring the lock also
/// disables interrupts on the current core for the duration of the guard's
/// lifetime: pool and device spinlocks must disable local interrupts, since
/// both are taken from ISR context.
pub struct IrqSpinlock<T: ?Sized> {
    next_ticket: AtomicUsize,
    now_serving: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for IrqSpinlock<T> {}
unsafe impl<T: ?Sized + Send> Send for IrqSpinlock<T> {}

impl<T> IrqSpinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicUsize::new(0),
            now_serving: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> IrqSpinlock<T> {
    pub fn lock(&self) -> IrqSpinlockGuard<'_, T> {
        #[cfg(feature = "critical-section")]
        let token = {
            // SAFETY: released in `IrqSpinlockGuard::drop` in the reverse order
            // acquired, matching `critical_section`'s nesting contract.
            let token = unsafe { critical_section::acquire() };
            token
        };

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }

        IrqSpinlockGuard {
            lock: self,
            #[cfg(feature = "critical-section")]
            token,
        }
    }

    pub fn try_lock(&self) -> Option<IrqSpinlockGuard<'_, T>> {
        let current = self.now_serving.load(Ordering::Acquire);
        #[cfg(feature = "critical-section")]
        let token = unsafe { critical_section::acquire() };
        let got_it = self
            .next_ticket
            .compare_exchange(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();

        if got_it {
            Some(IrqSpinlockGuard {
                lock: self,
                #[cfg(feature = "critical-section")]
                token,
            })
        } else {
            #[cfg(feature = "critical-section")]
            unsafe {
                critical_section::release(token);
            }
            None
        }
    }
}

pub struct IrqSpinlockGuard<'a, T: ?Sized> {
    lock: &'a IrqSpinlock<T>,
    #[cfg(feature = "critical-section")]
    token: critical_section::RestoreState,
}

impl<'a, T: ?Sized> Deref for IrqSpinlockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the ticket grants exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for IrqSpinlockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the ticket grants exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> Drop for IrqSpinlockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
        #[cfg(feature = "critical-section")]
        unsafe {
            critical_section::release(self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutual_exclusion_round_trip() {
        let lock = IrqSpinlock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = IrqSpinlock::new(());
        let _guard = lock.lock();
        assert!(lock.try_lock().is_none());
    }
}
