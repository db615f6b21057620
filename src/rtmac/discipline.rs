//! The discipline capability interface and the global, name-keyed registry
//! of discipline implementations, modeled as a capability interface so new
//! disciplines plug in without touching the attach/detach orchestration.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use crate::device::DeviceHandle;
use crate::error::{Error, Result};
use crate::rtskb::DefaultSkb;
use crate::sync::AdminMutex;

/// A read-only proc-style report a discipline contributes, e.g. the TDMA
/// discipline's `/rtnet/tdma` and `/rtnet/tdma_slots` text. No real procfs
/// inode backs this; a host kernel's own proc glue calls `render` when a
/// read comes in.
pub struct ProcEntry {
    pub name: &'static str,
    pub render: fn(&dyn Discipline, &DeviceHandle) -> String,
}

/// A pluggable MAC-layer discipline: TDMA is the one this crate ships, but
/// the interface is the seam any future discipline attaches through.
pub trait Discipline: Send + Sync {
    fn name(&self) -> &'static str;

    /// The 16-bit tag this discipline stamps into the RTmac header's
    /// `type` field.
    fn disc_type(&self) -> u16;

    /// Initializes this discipline's private state for `dev`. Called with
    /// `dev`'s non-real-time mutex held.
    fn attach(&self, dev: &DeviceHandle) -> Result<()>;

    /// Tears down `dev`'s private state. Called with `dev`'s non-real-time
    /// mutex held.
    fn detach(&self, dev: &DeviceHandle) -> Result<()>;

    /// The device's intercepted real-time transmit entry point.
    fn rt_packet_tx(&self, skb: DefaultSkb, dev: &DeviceHandle) -> Result<()>;

    /// The tunnel path the VNIC uses for best-effort traffic.
    fn nrt_packet_tx(&self, skb: DefaultSkb, dev: &DeviceHandle) -> Result<()>;

    /// The usable MTU for one frame on `dev` under this discipline (may be
    /// smaller than the device's own MTU, e.g. a TDMA slot's configured
    /// size).
    fn mtu(&self, dev: &DeviceHandle) -> u16;

    /// Handles a frame addressed to this discipline's type, already
    /// stripped of the RTmac header.
    fn packet_rx(&self, skb: DefaultSkb, dev: &DeviceHandle);

    fn proc_entries(&self) -> &[ProcEntry] {
        &[]
    }

    /// Lets a `ProcEntry::render` function, which only sees `&dyn
    /// Discipline`, recover the concrete type to read its own per-device
    /// reporting state.
    fn as_any(&self) -> &dyn core::any::Any;
}

/// The global set of registered discipline implementations, keyed by name.
pub struct DisciplineRegistry {
    inner: AdminMutex<BTreeMap<String, Arc<dyn Discipline>>>,
}

impl DisciplineRegistry {
    pub fn new() -> Self {
        Self {
            inner: AdminMutex::new(BTreeMap::new()),
        }
    }

    /// Rejects registration if `disc.name()` is already present.
    pub fn register(&self, disc: Arc<dyn Discipline>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.contains_key(disc.name()) {
            return Err(Error::Busy);
        }
        inner.insert(String::from(disc.name()), disc);
        Ok(())
    }

    /// Unlinks the discipline. Any proc entries it contributed are simply
    /// dropped along with it — there is no separate proc-tree state to
    /// unwind since entries are rendered on demand, not installed inodes.
    pub fn deregister(&self, name: &str) -> Result<()> {
        self.inner.lock().remove(name).map(|_| ()).ok_or(Error::NoSuchDevice)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Discipline>> {
        self.inner.lock().get(name).cloned()
    }

    pub fn names(&self) -> alloc::vec::Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }
}

impl Default for DisciplineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub(&'static str);
    impl Discipline for Stub {
        fn name(&self) -> &'static str {
            self.0
        }
        fn disc_type(&self) -> u16 {
            0xdead
        }
        fn attach(&self, _dev: &DeviceHandle) -> Result<()> {
            Ok(())
        }
        fn detach(&self, _dev: &DeviceHandle) -> Result<()> {
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
        fn packet_rx(&self, _skb: DefaultSkb, _dev: &DeviceHandle) {}
        fn as_any(&self) -> &dyn core::any::Any {
            self
        }
    }

    #[test]
    fn register_then_deregister_leaves_registry_unchanged() {
        let registry = DisciplineRegistry::new();
        registry.register(Arc::new(Stub("tdma"))).unwrap();
        assert!(registry.get("tdma").is_some());
        registry.deregister("tdma").unwrap();
        assert!(registry.get("tdma").is_none());
        assert!(registry.names().is_empty());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = DisciplineRegistry::new();
        registry.register(Arc::new(Stub("tdma"))).unwrap();
        assert!(matches!(registry.register(Arc::new(Stub("tdma"))), Err(Error::Busy)));
    }
}
