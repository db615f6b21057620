//! Server side of the configuration protocol: one connection record per
//! expected client, driven through its state diagram one step per cycle.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::sync::AdminMutex;

use super::frame::{AddrType, RtcfgFrame};

/// Frame header plus the worst-case per-frame overhead this crate assumes
/// when computing the maximum stage-2 fragment size.
pub const DEFAULT_FRAME_OVERHEAD: usize = 20;

/// Consecutive missed heartbeats before a station is declared dead.
const HEARTBEAT_MISS_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    New,
    Stage1Sent,
    Announced,
    Stage2Sent,
    Acked,
    Ready,
    Dead,
}

struct Connection {
    addr_type: AddrType,
    client_addr: Option<[u8; 4]>,
    server_addr: Option<[u8; 4]>,
    burstrate: u8,
    stage1: Vec<u8>,
    stage2: Vec<u8>,
    heartbeat_period_ms: u16,
    state: ConnState,
    frag_cursor: usize,
    missed_heartbeats: u32,
    last_heartbeat_ns: u64,
}

/// One server instance per configured segment, keyed by the client's MAC
/// address: owns a connection record for every expected client.
pub struct Server {
    mtu: u16,
    frame_overhead: usize,
    connections: AdminMutex<BTreeMap<[u8; 6], Connection>>,
}

impl Server {
    pub fn new(mtu: u16) -> Self {
        Self {
            mtu,
            frame_overhead: DEFAULT_FRAME_OVERHEAD,
            connections: AdminMutex::new(BTreeMap::new()),
        }
    }

    pub fn max_fragment(&self) -> usize {
        (self.mtu as usize).saturating_sub(self.frame_overhead)
    }

    /// Registers an expected client. Fails with [`Error::Stage1TooLarge`]
    /// (`ESTAGE1SIZE`) if `stage1` would not fit in one frame.
    #[allow(clippy::too_many_arguments)]
    pub fn add_station(
        &self,
        mac: [u8; 6],
        addr_type: AddrType,
        client_addr: Option<[u8; 4]>,
        server_addr: Option<[u8; 4]>,
        stage1: Vec<u8>,
        stage2: Vec<u8>,
        burstrate: u8,
        heartbeat_period_ms: u16,
    ) -> Result<()> {
        if stage1.len() > self.max_fragment() {
            log::debug!("rtcfg: stage-1 payload for a new station exceeds max fragment size, rejecting");
            return Err(Error::Stage1TooLarge);
        }
        self.connections.lock().insert(
            mac,
            Connection {
                addr_type,
                client_addr,
                server_addr,
                burstrate,
                stage1,
                stage2,
                heartbeat_period_ms,
                state: ConnState::New,
                frag_cursor: 0,
                missed_heartbeats: 0,
                last_heartbeat_ns: 0,
            },
        );
        Ok(())
    }

    pub fn state_of(&self, mac: [u8; 6]) -> Option<ConnState> {
        self.connections.lock().get(&mac).map(|c| c.state)
    }

    /// Number of connections at or past `ACKED`.
    pub fn station_count(&self) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|c| matches!(c.state, ConnState::Acked | ConnState::Ready))
            .count()
    }

    /// Drives `mac`'s connection forward by whatever its current state
    /// allows without waiting on a peer frame, returning the frame to send
    /// if one is due. A no-op (`None`) in states that are only advanced by
    /// [`Self::on_frame`].
    pub fn next_frame(&self, mac: [u8; 6]) -> Option<RtcfgFrame> {
        let mut conns = self.connections.lock();
        let stations = conns.len() as u16;
        let conn = conns.get_mut(&mac)?;
        match conn.state {
            ConnState::New => {
                conn.state = ConnState::Stage1Sent;
                Some(RtcfgFrame::Stage1Cfg {
                    addr_type: conn.addr_type,
                    client_addr: conn.client_addr,
                    server_addr: conn.server_addr,
                    burstrate: conn.burstrate,
                    payload: conn.stage1.clone(),
                })
            }
            ConnState::Announced => {
                let max_frag = self.max_fragment();
                let first_len = conn.stage2.len().min(max_frag);
                conn.frag_cursor = first_len;
                conn.state = ConnState::Stage2Sent;
                Some(RtcfgFrame::Stage2Cfg {
                    flags: 0,
                    stations,
                    heartbeat_period_ms: conn.heartbeat_period_ms,
                    cfg_len: conn.stage2.len() as u32,
                    payload: conn.stage2[..first_len].to_vec(),
                })
            }
            _ => None,
        }
    }

    /// Handles a frame received from `mac`'s client, returning a reply frame
    /// if the state machine produces one.
    pub fn on_frame(&self, mac: [u8; 6], frame: &RtcfgFrame) -> Option<RtcfgFrame> {
        let mut conns = self.connections.lock();
        let conn = conns.get_mut(&mac)?;
        match (conn.state, frame) {
            (ConnState::Stage1Sent, RtcfgFrame::AnnounceNew { .. }) => {
                conn.state = ConnState::Announced;
                None
            }
            (ConnState::Stage2Sent, RtcfgFrame::AckCfg { ack_len }) => {
                let ack_len = *ack_len as usize;
                if ack_len >= conn.stage2.len() {
                    conn.state = ConnState::Acked;
                    None
                } else {
                    let max_frag = self.max_fragment();
                    let remaining = conn.stage2.len() - conn.frag_cursor;
                    let len = remaining.min(max_frag);
                    let offs = conn.frag_cursor;
                    conn.frag_cursor += len;
                    Some(RtcfgFrame::Stage2CfgFrag {
                        frag_offs: offs as u32,
                        payload: conn.stage2[offs..offs + len].to_vec(),
                    })
                }
            }
            (ConnState::Acked, RtcfgFrame::Ready) => {
                conn.state = ConnState::Ready;
                None
            }
            (ConnState::Ready, RtcfgFrame::Heartbeat) => {
                conn.missed_heartbeats = 0;
                None
            }
            (state, frame) => {
                log::trace!("rtcfg: dropping {frame:?} unexpected in state {state:?}");
                None
            }
        }
    }

    /// Updates `mac`'s last-heartbeat timestamp. Call from whatever receives
    /// a `Heartbeat` frame; kept separate from [`Self::on_frame`] so the
    /// caller can supply the current clock reading.
    pub fn note_heartbeat(&self, mac: [u8; 6], now_ns: u64) {
        if let Some(conn) = self.connections.lock().get_mut(&mac) {
            conn.last_heartbeat_ns = now_ns;
            conn.missed_heartbeats = 0;
        }
    }

    /// Checks every `READY` connection's heartbeat age against its period
    /// and declares dead any station past [`HEARTBEAT_MISS_LIMIT`] periods,
    /// returning a broadcast `DeadStation` frame per newly dead station.
    pub fn check_heartbeats(&self, now_ns: u64) -> Vec<RtcfgFrame> {
        let mut dead = Vec::new();
        let mut conns = self.connections.lock();
        for (mac, conn) in conns.iter_mut() {
            if conn.state != ConnState::Ready {
                continue;
            }
            let period_ns = conn.heartbeat_period_ms as u64 * 1_000_000;
            if period_ns == 0 {
                continue;
            }
            let elapsed = now_ns.saturating_sub(conn.last_heartbeat_ns);
            if elapsed >= period_ns * HEARTBEAT_MISS_LIMIT as u64 {
                conn.state = ConnState::Dead;
                log::warn!("rtcfg: station {mac:02x?} missed {HEARTBEAT_MISS_LIMIT} heartbeats, declaring dead");
                dead.push(RtcfgFrame::DeadStation {
                    addr_type: conn.addr_type,
                    addr: conn.client_addr,
                    mac: *mac,
                });
            }
        }
        dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(n: u8) -> [u8; 6] {
        [0xaa, 0xbb, 0xcc, 0xdd, 0xee, n]
    }

    #[test]
    fn stage1_payload_over_max_fragment_is_rejected() {
        let server = Server::new(100);
        let oversize = alloc::vec![0u8; server.max_fragment() + 1];
        assert!(matches!(
            server.add_station(mac(1), AddrType::None, None, None, oversize, Vec::new(), 0, 0),
            Err(Error::Stage1TooLarge)
        ));
    }

    #[test]
    fn bring_up_emits_stage1_with_expected_payload() {
        let server = Server::new(1500);
        server
            .add_station(
                mac(2),
                AddrType::Ip,
                Some([10, 0, 0, 2]),
                Some([10, 0, 0, 1]),
                alloc::vec![1, 2, 3, 4],
                Vec::new(),
                0,
                100,
            )
            .unwrap();
        let frame = server.next_frame(mac(2)).unwrap();
        match frame {
            RtcfgFrame::Stage1Cfg { payload, client_addr, .. } => {
                assert_eq!(payload, alloc::vec![1, 2, 3, 4]);
                assert_eq!(client_addr, Some([10, 0, 0, 2]));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(server.state_of(mac(2)), Some(ConnState::Stage1Sent));
    }

    #[test]
    fn fragmented_stage2_splits_at_mtu_minus_overhead() {
        let server = Server::new(1500);
        server
            .add_station(mac(3), AddrType::None, None, None, Vec::new(), alloc::vec![7u8; 3000], 0, 100)
            .unwrap();
        server.next_frame(mac(3));
        server.on_frame(mac(3), &RtcfgFrame::AnnounceNew { addr_type: AddrType::None, addr: None, flags: 0, burstrate: 0 });
        let first = server.next_frame(mac(3)).unwrap();
        let first_len = match first {
            RtcfgFrame::Stage2Cfg { payload, cfg_len, .. } => {
                assert_eq!(cfg_len, 3000);
                assert_eq!(payload.len(), 1480);
                payload.len()
            }
            other => panic!("unexpected frame: {other:?}"),
        };

        let second = server.on_frame(mac(3), &RtcfgFrame::AckCfg { ack_len: first_len as u32 }).unwrap();
        let second_len = match second {
            RtcfgFrame::Stage2CfgFrag { frag_offs, payload } => {
                assert_eq!(frag_offs, 1480);
                assert_eq!(payload.len(), 1480);
                payload.len()
            }
            other => panic!("unexpected frame: {other:?}"),
        };

        let third = server
            .on_frame(mac(3), &RtcfgFrame::AckCfg { ack_len: (first_len + second_len) as u32 })
            .unwrap();
        match third {
            RtcfgFrame::Stage2CfgFrag { frag_offs, payload } => {
                assert_eq!(frag_offs, 2960);
                assert_eq!(payload.len(), 40);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        assert!(server.on_frame(mac(3), &RtcfgFrame::AckCfg { ack_len: 3000 }).is_none());
        assert_eq!(server.state_of(mac(3)), Some(ConnState::Acked));
    }

    #[test]
    fn zero_length_stage2_acks_in_one_shot() {
        let server = Server::new(1500);
        server.add_station(mac(4), AddrType::None, None, None, Vec::new(), Vec::new(), 0, 100).unwrap();
        server.next_frame(mac(4));
        server.on_frame(mac(4), &RtcfgFrame::AnnounceNew { addr_type: AddrType::None, addr: None, flags: 0, burstrate: 0 });
        let stage2 = server.next_frame(mac(4)).unwrap();
        assert!(matches!(stage2, RtcfgFrame::Stage2Cfg { ref payload, .. } if payload.is_empty()));
        assert!(server.on_frame(mac(4), &RtcfgFrame::AckCfg { ack_len: 0 }).is_none());
        assert_eq!(server.state_of(mac(4)), Some(ConnState::Acked));
    }

    #[test]
    fn ready_then_missed_heartbeats_goes_dead() {
        let server = Server::new(1500);
        server.add_station(mac(5), AddrType::Ip, Some([10, 0, 0, 5]), None, Vec::new(), Vec::new(), 0, 100).unwrap();
        server.next_frame(mac(5));
        server.on_frame(mac(5), &RtcfgFrame::AnnounceNew { addr_type: AddrType::None, addr: None, flags: 0, burstrate: 0 });
        server.next_frame(mac(5));
        server.on_frame(mac(5), &RtcfgFrame::AckCfg { ack_len: 0 });
        server.on_frame(mac(5), &RtcfgFrame::Ready);
        assert_eq!(server.state_of(mac(5)), Some(ConnState::Ready));
        assert_eq!(server.station_count(), 1);

        server.note_heartbeat(mac(5), 0);
        assert!(server.check_heartbeats(299_000_000).is_empty());
        let dead = server.check_heartbeats(300_000_000);
        assert_eq!(dead.len(), 1);
        assert!(matches!(dead[0], RtcfgFrame::DeadStation { mac: m, .. } if m == mac(5)));
        assert_eq!(server.state_of(mac(5)), Some(ConnState::Dead));
    }
}
