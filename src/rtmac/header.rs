//! The 4-byte RTmac header prepended to every frame on an attached device:
//! `{u8 version, u8 flags, u16 type}`, all multi-byte fields big-endian.

use crate::error::{Error, Result};

pub const RTMAC_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 4;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        const TUNNEL = 0b0000_0001;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtmacHeader {
    pub version: u8,
    pub flags: HeaderFlags,
    pub disc_type: u16,
}

impl RtmacHeader {
    pub const fn new(disc_type: u16) -> Self {
        Self {
            version: RTMAC_VERSION,
            flags: HeaderFlags::empty(),
            disc_type,
        }
    }

    pub const fn tunnel(inner_ethertype: u16) -> Self {
        Self {
            version: RTMAC_VERSION,
            flags: HeaderFlags::TUNNEL,
            disc_type: inner_ethertype,
        }
    }

    pub fn encode(self) -> [u8; HEADER_LEN] {
        let t = self.disc_type.to_be_bytes();
        [self.version, self.flags.bits(), t[0], t[1]]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            version: bytes[0],
            flags: HeaderFlags::from_bits_truncate(bytes[1]),
            disc_type: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_all_fields() {
        let header = RtmacHeader {
            version: RTMAC_VERSION,
            flags: HeaderFlags::TUNNEL,
            disc_type: 0x0800,
        };
        let decoded = RtmacHeader::decode(&header.encode()).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn decode_rejects_short_input() {
        assert!(matches!(RtmacHeader::decode(&[1, 0, 0]), Err(Error::InvalidArgument)));
    }

    #[test]
    fn tunnel_constructor_sets_tunnel_flag() {
        let header = RtmacHeader::tunnel(0x0806);
        assert!(header.flags.contains(HeaderFlags::TUNNEL));
        assert_eq!(header.disc_type, 0x0806);
    }
}
