//! RTcfg wire frames: a 2-byte `{id, version=0}` head followed by a
//! frame-specific body, all multi-byte fields big-endian.

use alloc::vec::Vec;

use crate::error::{Error, Result};

const VERSION: u8 = 0;

const ID_STAGE_1_CFG: u8 = 1;
const ID_STAGE_2_CFG: u8 = 2;
const ID_STAGE_2_CFG_FRAG: u8 = 3;
const ID_ANNOUNCE_NEW: u8 = 4;
const ID_ANNOUNCE_REPLY: u8 = 5;
const ID_ACK_CFG: u8 = 6;
const ID_READY: u8 = 7;
const ID_HEARTBEAT: u8 = 8;
const ID_DEAD_STATION: u8 = 9;

/// Whether a frame carries an inline IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    None,
    Ip,
}

impl AddrType {
    fn encode(self) -> u8 {
        match self {
            AddrType::None => 0,
            AddrType::Ip => 1,
        }
    }

    fn decode(b: u8) -> Result<Self> {
        match b {
            0 => Ok(AddrType::None),
            1 => Ok(AddrType::Ip),
            _ => Err(Error::InvalidArgument),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcfgFrame {
    Stage1Cfg {
        addr_type: AddrType,
        client_addr: Option<[u8; 4]>,
        server_addr: Option<[u8; 4]>,
        burstrate: u8,
        payload: Vec<u8>,
    },
    Stage2Cfg {
        flags: u8,
        stations: u16,
        heartbeat_period_ms: u16,
        cfg_len: u32,
        payload: Vec<u8>,
    },
    Stage2CfgFrag {
        frag_offs: u32,
        payload: Vec<u8>,
    },
    AnnounceNew {
        addr_type: AddrType,
        addr: Option<[u8; 4]>,
        flags: u8,
        burstrate: u8,
    },
    AnnounceReply {
        addr_type: AddrType,
        addr: Option<[u8; 4]>,
        flags: u8,
        burstrate: u8,
    },
    AckCfg {
        ack_len: u32,
    },
    Ready,
    Heartbeat,
    DeadStation {
        addr_type: AddrType,
        addr: Option<[u8; 4]>,
        mac: [u8; 6],
    },
}

fn encode_announce(id: u8, addr_type: AddrType, addr: Option<[u8; 4]>, flags: u8, burstrate: u8) -> Vec<u8> {
    let mut out = alloc::vec![id, VERSION, addr_type.encode()];
    if let Some(addr) = addr {
        out.extend_from_slice(&addr);
    }
    out.push(flags);
    out.push(burstrate);
    out
}

fn decode_announce(bytes: &[u8]) -> Result<(AddrType, Option<[u8; 4]>, u8, u8)> {
    if bytes.is_empty() {
        return Err(Error::InvalidArgument);
    }
    let addr_type = AddrType::decode(bytes[0])?;
    let mut pos = 1;
    let addr = match addr_type {
        AddrType::Ip => {
            let a: [u8; 4] = bytes.get(pos..pos + 4).ok_or(Error::InvalidArgument)?.try_into().unwrap();
            pos += 4;
            Some(a)
        }
        AddrType::None => None,
    };
    let flags = *bytes.get(pos).ok_or(Error::InvalidArgument)?;
    let burstrate = *bytes.get(pos + 1).ok_or(Error::InvalidArgument)?;
    Ok((addr_type, addr, flags, burstrate))
}

impl RtcfgFrame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            RtcfgFrame::Stage1Cfg { addr_type, client_addr, server_addr, burstrate, payload } => {
                let mut out = alloc::vec![ID_STAGE_1_CFG, VERSION, addr_type.encode()];
                if let (AddrType::Ip, Some(c), Some(s)) = (addr_type, client_addr, server_addr) {
                    out.extend_from_slice(c);
                    out.extend_from_slice(s);
                }
                out.push(*burstrate);
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                out.extend_from_slice(payload);
                out
            }
            RtcfgFrame::Stage2Cfg { flags, stations, heartbeat_period_ms, cfg_len, payload } => {
                let mut out = alloc::vec![ID_STAGE_2_CFG, VERSION, *flags];
                out.extend_from_slice(&stations.to_be_bytes());
                out.extend_from_slice(&heartbeat_period_ms.to_be_bytes());
                out.extend_from_slice(&cfg_len.to_be_bytes());
                out.extend_from_slice(payload);
                out
            }
            RtcfgFrame::Stage2CfgFrag { frag_offs, payload } => {
                let mut out = alloc::vec![ID_STAGE_2_CFG_FRAG, VERSION];
                out.extend_from_slice(&frag_offs.to_be_bytes());
                out.extend_from_slice(payload);
                out
            }
            RtcfgFrame::AnnounceNew { addr_type, addr, flags, burstrate } => {
                encode_announce(ID_ANNOUNCE_NEW, *addr_type, *addr, *flags, *burstrate)
            }
            RtcfgFrame::AnnounceReply { addr_type, addr, flags, burstrate } => {
                encode_announce(ID_ANNOUNCE_REPLY, *addr_type, *addr, *flags, *burstrate)
            }
            RtcfgFrame::AckCfg { ack_len } => {
                let mut out = alloc::vec![ID_ACK_CFG, VERSION];
                out.extend_from_slice(&ack_len.to_be_bytes());
                out
            }
            RtcfgFrame::Ready => alloc::vec![ID_READY, VERSION],
            RtcfgFrame::Heartbeat => alloc::vec![ID_HEARTBEAT, VERSION],
            RtcfgFrame::DeadStation { addr_type, addr, mac } => {
                let mut out = alloc::vec![ID_DEAD_STATION, VERSION, addr_type.encode()];
                if let Some(addr) = addr {
                    out.extend_from_slice(addr);
                }
                out.extend_from_slice(mac);
                out
            }
        }
    }

    /// Parses a frame. A receive-side parse error (too short, unknown id,
    /// wrong version) is reported so the caller can drop the frame silently.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::InvalidArgument);
        }
        let (id, version) = (bytes[0], bytes[1]);
        if version != VERSION {
            return Err(Error::InvalidArgument);
        }
        let body = &bytes[2..];
        match id {
            ID_STAGE_1_CFG => {
                let addr_type = AddrType::decode(*body.first().ok_or(Error::InvalidArgument)?)?;
                let mut pos = 1;
                let (client_addr, server_addr) = match addr_type {
                    AddrType::Ip => {
                        let c: [u8; 4] = body.get(pos..pos + 4).ok_or(Error::InvalidArgument)?.try_into().unwrap();
                        pos += 4;
                        let s: [u8; 4] = body.get(pos..pos + 4).ok_or(Error::InvalidArgument)?.try_into().unwrap();
                        pos += 4;
                        (Some(c), Some(s))
                    }
                    AddrType::None => (None, None),
                };
                let burstrate = *body.get(pos).ok_or(Error::InvalidArgument)?;
                pos += 1;
                let cfg_len = u16::from_be_bytes(
                    body.get(pos..pos + 2).ok_or(Error::InvalidArgument)?.try_into().unwrap(),
                ) as usize;
                pos += 2;
                let payload = body.get(pos..pos + cfg_len).ok_or(Error::InvalidArgument)?.to_vec();
                Ok(RtcfgFrame::Stage1Cfg { addr_type, client_addr, server_addr, burstrate, payload })
            }
            ID_STAGE_2_CFG => {
                if body.len() < 9 {
                    return Err(Error::InvalidArgument);
                }
                let flags = body[0];
                let stations = u16::from_be_bytes([body[1], body[2]]);
                let heartbeat_period_ms = u16::from_be_bytes([body[3], body[4]]);
                let cfg_len = u32::from_be_bytes([body[5], body[6], body[7], body[8]]);
                let payload = body[9..].to_vec();
                Ok(RtcfgFrame::Stage2Cfg { flags, stations, heartbeat_period_ms, cfg_len, payload })
            }
            ID_STAGE_2_CFG_FRAG => {
                if body.len() < 4 {
                    return Err(Error::InvalidArgument);
                }
                let frag_offs = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                let payload = body[4..].to_vec();
                Ok(RtcfgFrame::Stage2CfgFrag { frag_offs, payload })
            }
            ID_ANNOUNCE_NEW => {
                let (addr_type, addr, flags, burstrate) = decode_announce(body)?;
                Ok(RtcfgFrame::AnnounceNew { addr_type, addr, flags, burstrate })
            }
            ID_ANNOUNCE_REPLY => {
                let (addr_type, addr, flags, burstrate) = decode_announce(body)?;
                Ok(RtcfgFrame::AnnounceReply { addr_type, addr, flags, burstrate })
            }
            ID_ACK_CFG => {
                if body.len() < 4 {
                    return Err(Error::InvalidArgument);
                }
                let ack_len = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                Ok(RtcfgFrame::AckCfg { ack_len })
            }
            ID_READY => Ok(RtcfgFrame::Ready),
            ID_HEARTBEAT => Ok(RtcfgFrame::Heartbeat),
            ID_DEAD_STATION => {
                let addr_type = AddrType::decode(*body.first().ok_or(Error::InvalidArgument)?)?;
                let mut pos = 1;
                let addr = match addr_type {
                    AddrType::Ip => {
                        let a: [u8; 4] = body.get(pos..pos + 4).ok_or(Error::InvalidArgument)?.try_into().unwrap();
                        pos += 4;
                        Some(a)
                    }
                    AddrType::None => None,
                };
                let mac: [u8; 6] = body.get(pos..pos + 6).ok_or(Error::InvalidArgument)?.try_into().unwrap();
                Ok(RtcfgFrame::DeadStation { addr_type, addr, mac })
            }
            _ => Err(Error::InvalidArgument),
        }
    }
}
