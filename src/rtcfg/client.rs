//! Client side of the configuration protocol: accumulates the server's
//! staged configuration and tracks readiness.

use alloc::vec::Vec;

use super::frame::{AddrType, RtcfgFrame};
use crate::sync::AdminMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    WaitingStage1,
    WaitingStage2,
    WaitMore,
    Complete,
}

struct Mutable {
    state: ClientState,
    addr_type: AddrType,
    addr: Option<[u8; 4]>,
    stage1: Vec<u8>,
    stage2: Vec<u8>,
    stage2_expected_len: usize,
}

/// One instance per client station. `addr_type`/`addr` are the client's own
/// address, announced back to the server in `ANNOUNCE_NEW`.
pub struct Client {
    mutable: AdminMutex<Mutable>,
}

impl Client {
    pub fn new(addr_type: AddrType, addr: Option<[u8; 4]>) -> Self {
        Self {
            mutable: AdminMutex::new(Mutable {
                state: ClientState::Idle,
                addr_type,
                addr,
                stage1: Vec::new(),
                stage2: Vec::new(),
                stage2_expected_len: 0,
            }),
        }
    }

    pub fn state(&self) -> ClientState {
        self.mutable.lock().state
    }

    pub fn stage1_payload(&self) -> Vec<u8> {
        self.mutable.lock().stage1.clone()
    }

    pub fn stage2_payload(&self) -> Vec<u8> {
        self.mutable.lock().stage2.clone()
    }

    /// Moves into `WAITING_STAGE_1`, matching an interface brought up with
    /// `RTCFG_IOC_CLIENT`.
    pub fn start_wait(&self) {
        self.mutable.lock().state = ClientState::WaitingStage1;
    }

    /// Feeds a frame received from the server, returning a reply frame if
    /// the state machine has one to send. Frames that don't fit the current
    /// state are dropped silently, matching the server's failure rule.
    pub fn on_frame(&self, frame: &RtcfgFrame) -> Option<RtcfgFrame> {
        let mut m = self.mutable.lock();
        match (m.state, frame) {
            (ClientState::WaitingStage1, RtcfgFrame::Stage1Cfg { payload, .. }) => {
                m.stage1 = payload.clone();
                m.state = ClientState::WaitingStage2;
                Some(RtcfgFrame::AnnounceNew {
                    addr_type: m.addr_type,
                    addr: m.addr,
                    flags: 0,
                    burstrate: 0,
                })
            }
            (ClientState::WaitingStage2, RtcfgFrame::Stage2Cfg { cfg_len, payload, .. }) => {
                m.stage2_expected_len = *cfg_len as usize;
                m.stage2 = payload.clone();
                let ack_len = m.stage2.len() as u32;
                if m.stage2.len() >= m.stage2_expected_len {
                    m.state = ClientState::Complete;
                } else {
                    m.state = ClientState::WaitMore;
                }
                Some(RtcfgFrame::AckCfg { ack_len })
            }
            (ClientState::WaitMore, RtcfgFrame::Stage2CfgFrag { frag_offs, payload }) => {
                if *frag_offs as usize == m.stage2.len() {
                    m.stage2.extend_from_slice(payload);
                }
                let ack_len = m.stage2.len() as u32;
                if m.stage2.len() >= m.stage2_expected_len {
                    m.state = ClientState::Complete;
                }
                Some(RtcfgFrame::AckCfg { ack_len })
            }
            (state, frame) => {
                log::trace!("rtcfg: dropping {frame:?} unexpected in state {state:?}");
                None
            }
        }
    }

    /// Builds the `READY` frame sent in response to `RTCFG_IOC_READY`,
    /// valid once stage-2 configuration has fully arrived.
    pub fn request_ready(&self) -> Option<RtcfgFrame> {
        if self.mutable.lock().state == ClientState::Complete {
            Some(RtcfgFrame::Ready)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage1_then_announce() {
        let client = Client::new(AddrType::Ip, Some([10, 0, 0, 9]));
        client.start_wait();
        let reply = client
            .on_frame(&RtcfgFrame::Stage1Cfg {
                addr_type: AddrType::None,
                client_addr: None,
                server_addr: None,
                burstrate: 0,
                payload: alloc::vec![9, 9],
            })
            .unwrap();
        assert!(matches!(reply, RtcfgFrame::AnnounceNew { addr: Some([10, 0, 0, 9]), .. }));
        assert_eq!(client.state(), ClientState::WaitingStage2);
        assert_eq!(client.stage1_payload(), alloc::vec![9, 9]);
    }

    #[test]
    fn zero_length_stage2_completes_immediately() {
        let client = Client::new(AddrType::None, None);
        client.start_wait();
        client.on_frame(&RtcfgFrame::Stage1Cfg {
            addr_type: AddrType::None,
            client_addr: None,
            server_addr: None,
            burstrate: 0,
            payload: Vec::new(),
        });
        let ack = client
            .on_frame(&RtcfgFrame::Stage2Cfg {
                flags: 0,
                stations: 1,
                heartbeat_period_ms: 100,
                cfg_len: 0,
                payload: Vec::new(),
            })
            .unwrap();
        assert!(matches!(ack, RtcfgFrame::AckCfg { ack_len: 0 }));
        assert_eq!(client.state(), ClientState::Complete);
        assert!(client.request_ready().is_some());
    }

    #[test]
    fn fragmented_stage2_accumulates_and_completes() {
        let client = Client::new(AddrType::None, None);
        client.start_wait();
        client.on_frame(&RtcfgFrame::Stage1Cfg {
            addr_type: AddrType::None,
            client_addr: None,
            server_addr: None,
            burstrate: 0,
            payload: Vec::new(),
        });
        client.on_frame(&RtcfgFrame::Stage2Cfg {
            flags: 0,
            stations: 1,
            heartbeat_period_ms: 100,
            cfg_len: 3000,
            payload: alloc::vec![1u8; 1480],
        });
        assert_eq!(client.state(), ClientState::WaitMore);
        client.on_frame(&RtcfgFrame::Stage2CfgFrag { frag_offs: 1480, payload: alloc::vec![2u8; 1480] });
        assert_eq!(client.state(), ClientState::WaitMore);
        let ack = client
            .on_frame(&RtcfgFrame::Stage2CfgFrag { frag_offs: 2960, payload: alloc::vec![3u8; 40] })
            .unwrap();
        assert!(matches!(ack, RtcfgFrame::AckCfg { ack_len: 3000 }));
        assert_eq!(client.state(), ClientState::Complete);
        assert_eq!(client.stage2_payload().len(), 3000);
    }

    #[test]
    fn request_ready_before_complete_is_none() {
        let client = Client::new(AddrType::None, None);
        client.start_wait();
        assert!(client.request_ready().is_none());
    }
}
