//! The ioctl command surface exposed by the misc character device.
//!
//! Every ioctl argument starts with a fixed-size header naming the target
//! interface by name; the dispatcher resolves the device unless
//! [`HeaderFlags::NODEV_PARAM`] is set, then routes on the high nibble of the
//! request code.

use crate::error::{Error, Result};

/// Interface names are stored null-padded in the ioctl header, same bound as
/// `DeviceRecord::name`.
pub const IFNAMSIZ: usize = 16;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        /// The ioctl carries no interface name; the dispatcher must not try
        /// to resolve a device from the header.
        const NODEV_PARAM = 0x1;
    }
}

/// The 16-byte header every ioctl argument begins with.
#[derive(Debug, Clone, Copy)]
pub struct IoctlHeader {
    pub if_name: [u8; IFNAMSIZ],
    pub flags: HeaderFlags,
}

impl IoctlHeader {
    pub fn named(if_name: &str) -> Self {
        let mut buf = [0u8; IFNAMSIZ];
        let bytes = if_name.as_bytes();
        let n = bytes.len().min(IFNAMSIZ - 1);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self { if_name: buf, flags: HeaderFlags::empty() }
    }

    pub fn without_device() -> Self {
        Self { if_name: [0; IFNAMSIZ], flags: HeaderFlags::NODEV_PARAM }
    }

    pub fn if_name_str(&self) -> &str {
        let len = self.if_name.iter().position(|&b| b == 0).unwrap_or(IFNAMSIZ);
        core::str::from_utf8(&self.if_name[..len]).unwrap_or("")
    }
}

/// The subsystem a request code is routed to, recovered from the high
/// nibble of the request code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Core,
    RtcfgCfg,
    RtmacTdma,
}

fn subsystem_of(request: u32) -> Result<Subsystem> {
    match (request >> 28) & 0xf {
        0x0 => Ok(Subsystem::Core),
        0x1 => Ok(Subsystem::RtcfgCfg),
        0x2 => Ok(Subsystem::RtmacTdma),
        nibble => {
            log::debug!("ioctl: request {request:#010x} has unknown subsystem nibble {nibble:#x}");
            Err(Error::InvalidArgument)
        }
    }
}

macro_rules! request_code {
    ($subsystem_nibble:expr, $ordinal:expr) => {
        ($subsystem_nibble << 28) | $ordinal
    };
}

pub mod core_req {
    //! CORE subsystem request codes.
    pub const IFUP: u32 = request_code!(0x0, 1);
    pub const IFDOWN: u32 = request_code!(0x0, 2);
    pub const IFINFO: u32 = request_code!(0x0, 3);
}

pub mod rtcfg_req {
    //! RTCFG subsystem request codes.
    pub const SERVER: u32 = request_code!(0x1, 1);
    pub const ADD_IP: u32 = request_code!(0x1, 2);
    pub const ADD_MAC: u32 = request_code!(0x1, 3);
    pub const ADD_IP_MAC: u32 = request_code!(0x1, 4);
    pub const WAIT: u32 = request_code!(0x1, 5);
    pub const CLIENT: u32 = request_code!(0x1, 6);
    pub const ANNOUNCE: u32 = request_code!(0x1, 7);
    pub const READY: u32 = request_code!(0x1, 8);
}

pub mod tdma_req {
    //! RTMAC_TDMA subsystem request codes.
    pub const SET_SLOT: u32 = request_code!(0x2, 1);
    pub const SET_MASTER: u32 = request_code!(0x2, 2);
}

/// Result of routing a request code: which subsystem handles it, and
/// whether the caller needs a resolved device handle first.
pub struct Routed {
    pub subsystem: Subsystem,
    pub needs_device: bool,
}

/// Routes `request` per the header's flags, without resolving the device —
/// callers combine this with [`crate::device::DeviceRegistry::get_by_name`]
/// using [`IoctlHeader::if_name_str`].
pub fn route(request: u32, header: &IoctlHeader) -> Result<Routed> {
    let subsystem = subsystem_of(request)?;
    Ok(Routed {
        subsystem,
        needs_device: !header.flags.contains(HeaderFlags::NODEV_PARAM),
    })
}
