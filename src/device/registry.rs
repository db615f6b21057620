//! The device table: ifindex assignment and name/index lookup.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use crate::error::{Error, Result};
use crate::sync::AdminMutex;

use super::record::{DeviceFlags, DeviceHandle, DeviceRecord, TxHandler};

/// Highest ifindex this registry will assign. The bound is left to the
/// embedding kernel; a few dozen real-time interfaces is a generous ceiling
/// for the TDMA/RTcfg segments this crate targets.
pub const MAX_DEVICES: u32 = 64;

struct Inner {
    by_index: BTreeMap<u32, DeviceHandle>,
    by_name: BTreeMap<String, u32>,
}

/// Assigns ifindexes 1..=[`MAX_DEVICES`] and resolves devices by either
/// index or name. One instance is shared by every subsystem that needs to
/// look up a device (dispatch, RTmac attach, RTcfg).
pub struct DeviceRegistry {
    inner: AdminMutex<Inner>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            inner: AdminMutex::new(Inner {
                by_index: BTreeMap::new(),
                by_name: BTreeMap::new(),
            }),
        }
    }

    /// Assigns the next free ifindex in `1..=MAX_DEVICES`, stores the
    /// record, and charges the registry's own reference to it. Fails with
    /// [`Error::Busy`] if `name` is already registered, or
    /// [`Error::OutOfMemory`] if the table is full.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &self,
        name: impl Into<String>,
        hw_addr: [u8; 6],
        mtu: u16,
        flags: DeviceFlags,
        local_ip: Option<[u8; 4]>,
        broadcast_ip: Option<[u8; 4]>,
        base_addr: usize,
        original_tx: Arc<dyn TxHandler>,
    ) -> Result<DeviceHandle> {
        let name = name.into();
        let mut inner = self.inner.lock();
        if inner.by_name.contains_key(&name) {
            return Err(Error::Busy);
        }
        let ifindex = (1..=MAX_DEVICES)
            .find(|i| !inner.by_index.contains_key(i))
            .ok_or(Error::OutOfMemory)?;

        let record = Arc::new(DeviceRecord::new(
            ifindex,
            name.clone(),
            hw_addr,
            mtu,
            flags,
            local_ip,
            broadcast_ip,
            base_addr,
            original_tx,
        ));
        inner.by_index.insert(ifindex, record.clone());
        inner.by_name.insert(name, ifindex);
        Ok(record)
    }

    /// Removes a device from the table. The caller must have torn down any
    /// attached discipline first (attach and detach are symmetric); this
    /// only unlinks the record, it does not force outstanding handles to
    /// drop.
    pub fn unregister(&self, ifindex: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        let record = inner.by_index.remove(&ifindex).ok_or(Error::NoSuchDevice)?;
        inner.by_name.remove(record.name());
        Ok(())
    }

    /// Returns a referenced handle, charging a reference the caller must
    /// eventually release with [`super::record::dereference`].
    pub fn get_by_index(&self, ifindex: u32) -> Result<DeviceHandle> {
        let inner = self.inner.lock();
        let record = inner.by_index.get(&ifindex).ok_or(Error::NoSuchDevice)?;
        record.hold();
        Ok(record.clone())
    }

    pub fn get_by_name(&self, name: &str) -> Result<DeviceHandle> {
        let inner = self.inner.lock();
        let ifindex = *inner.by_name.get(name).ok_or(Error::NoSuchDevice)?;
        let record = inner.by_index.get(&ifindex).expect("by_name/by_index out of sync");
        record.hold();
        Ok(record.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered ifindex, for proc-style reporting.
    pub fn ifindexes(&self) -> alloc::vec::Vec<u32> {
        self.inner.lock().by_index.keys().copied().collect()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
