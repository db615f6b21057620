//! TDMA's own control frames, carried as the payload after the RTmac
//! header whose `type` equals [`TDMA_DISC_TYPE`].

use crate::error::{Error, Result};

/// The 16-bit discipline-type tag this discipline stamps into the RTmac
/// header.
pub const TDMA_DISC_TYPE: u16 = 0x0003;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdmaFrame {
    /// Master beacon: its epoch and cycle number, for slaves to resync to.
    Sync { epoch_ns: u64, cycle: u64 },
    /// A slave's calibration probe.
    ReqCal { probe_id: u32, sent_ns: u64 },
    /// The master's echo of a probe, used to infer round-trip delay.
    ReplyCal { probe_id: u32, echoed_ns: u64 },
}

const KIND_SYNC: u8 = 1;
const KIND_REQ_CAL: u8 = 2;
const KIND_REPLY_CAL: u8 = 3;

impl TdmaFrame {
    pub fn encode(self) -> heapless::Vec<u8, 32> {
        let mut out = heapless::Vec::new();
        match self {
            TdmaFrame::Sync { epoch_ns, cycle } => {
                let _ = out.push(KIND_SYNC);
                let _ = out.extend_from_slice(&epoch_ns.to_be_bytes());
                let _ = out.extend_from_slice(&cycle.to_be_bytes());
            }
            TdmaFrame::ReqCal { probe_id, sent_ns } => {
                let _ = out.push(KIND_REQ_CAL);
                let _ = out.extend_from_slice(&probe_id.to_be_bytes());
                let _ = out.extend_from_slice(&sent_ns.to_be_bytes());
            }
            TdmaFrame::ReplyCal { probe_id, echoed_ns } => {
                let _ = out.push(KIND_REPLY_CAL);
                let _ = out.extend_from_slice(&probe_id.to_be_bytes());
                let _ = out.extend_from_slice(&echoed_ns.to_be_bytes());
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidArgument);
        }
        match bytes[0] {
            KIND_SYNC if bytes.len() >= 17 => Ok(TdmaFrame::Sync {
                epoch_ns: u64::from_be_bytes(bytes[1..9].try_into().unwrap()),
                cycle: u64::from_be_bytes(bytes[9..17].try_into().unwrap()),
            }),
            KIND_REQ_CAL if bytes.len() >= 13 => Ok(TdmaFrame::ReqCal {
                probe_id: u32::from_be_bytes(bytes[1..5].try_into().unwrap()),
                sent_ns: u64::from_be_bytes(bytes[5..13].try_into().unwrap()),
            }),
            KIND_REPLY_CAL if bytes.len() >= 13 => Ok(TdmaFrame::ReplyCal {
                probe_id: u32::from_be_bytes(bytes[1..5].try_into().unwrap()),
                echoed_ns: u64::from_be_bytes(bytes[5..13].try_into().unwrap()),
            }),
            _ => Err(Error::InvalidArgument),
        }
    }
}
