//! Synchronization primitives and the host-RTOS interface.
//!
//! Real-time paths (ISR, TDMA worker, device transmit, packet dispatch) may
//! only block on a handful of explicit events (`worker_wakeup`, `sync_event`,
//! `xmit_event`, the stack-manager queue event). Everything this crate needs
//! from a concrete real-time operating system — task spawning, event
//! wait/signal, timers — is therefore kept behind the traits in [`rtos`],
//! treating the host RTOS as an external collaborator referenced only by
//! interface.
//!
//! Locking, by contrast, is this crate's own responsibility: pools and
//! devices carry their own spinlocks, implemented in [`spinlock`].

pub mod rtos;
mod spinlock;

pub use spinlock::IrqSpinlock;

/// A non-real-time administrative mutex.
///
/// Distinct type from [`IrqSpinlock`] only for documentation and
/// locking-order clarity: the fixed order is non-real-time mutex → device
/// spinlock → pool spinlock, and giving each role its own name makes that
/// order checkable by inspection.
pub type AdminMutex<T> = IrqSpinlock<T>;
