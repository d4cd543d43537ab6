//! Plain-data socket view.
//!
//! `SockSnapshot` is the stable schema a host hands to the probes: every
//! field the accessor layer can read, copied out at the moment an event fires.
//! The trace replay host deserialises it straight from JSON.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::accessor::{ConnectionId, SockCounters, SockFields};
use super::types::AF_INET;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SockSnapshot {
    pub id: ConnectionId,
    pub sampling_tag: u16,
    pub ktime_ns: u64,
    pub conn_tstamp_ns: u64,
    pub family: u16,
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub sk_state: u8,
    pub ca_bits: u8,
    pub rx_opt_bits: u16,
    pub ca_name: String,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub high_seq: u32,
    pub undo_marker: u32,
    pub prior_ssthresh: u32,
    pub snd_ssthresh: u32,
    pub snd_cwnd: u32,
    pub delivered: u32,
    pub sacked_out: u32,
    pub lost: u32,
    pub total_retrans: u32,
    pub mss_cache: u32,
    pub tlp_high_seq: u32,
    pub rcv_tsecr: u32,
    pub srtt_us: u32,
    pub mdev_us: u32,
    pub rttvar_us: u32,
    pub min_rtt_us: u32,
    pub tcp_mstamp_us: u64,
    pub rto: u32,
    pub counters: SockCounters,
}

impl Default for SockSnapshot {
    fn default() -> Self {
        let unspecified = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        Self {
            id: ConnectionId(0),
            sampling_tag: 0,
            ktime_ns: 0,
            conn_tstamp_ns: 0,
            family: AF_INET,
            src: unspecified,
            dst: unspecified,
            sk_state: 1,
            ca_bits: 0,
            rx_opt_bits: 0,
            ca_name: String::from("cubic"),
            snd_una: 0,
            snd_nxt: 0,
            high_seq: 0,
            undo_marker: 0,
            prior_ssthresh: 0,
            snd_ssthresh: 0,
            snd_cwnd: 10,
            delivered: 0,
            sacked_out: 0,
            lost: 0,
            total_retrans: 0,
            mss_cache: 1448,
            tlp_high_seq: 0,
            rcv_tsecr: 0,
            srtt_us: 0,
            mdev_us: 0,
            rttvar_us: 0,
            min_rtt_us: 0,
            tcp_mstamp_us: 0,
            rto: 200_000,
            counters: SockCounters::default(),
        }
    }
}

impl SockFields for SockSnapshot {
    fn conn_id(&self) -> ConnectionId {
        self.id
    }
    fn sampling_tag(&self) -> u16 {
        self.sampling_tag
    }
    fn ktime_ns(&self) -> u64 {
        self.ktime_ns
    }
    fn conn_tstamp_ns(&self) -> u64 {
        self.conn_tstamp_ns
    }
    fn family(&self) -> u16 {
        self.family
    }
    fn local_addr(&self) -> SocketAddr {
        self.src
    }
    fn remote_addr(&self) -> SocketAddr {
        self.dst
    }
    fn sk_state_raw(&self) -> u8 {
        self.sk_state
    }
    fn ca_bits_raw(&self) -> u8 {
        self.ca_bits
    }
    fn rx_opt_bits_raw(&self) -> u16 {
        self.rx_opt_bits
    }
    fn ca_name(&self) -> &str {
        &self.ca_name
    }
    fn snd_una(&self) -> u32 {
        self.snd_una
    }
    fn snd_nxt(&self) -> u32 {
        self.snd_nxt
    }
    fn high_seq(&self) -> u32 {
        self.high_seq
    }
    fn undo_marker(&self) -> u32 {
        self.undo_marker
    }
    fn prior_ssthresh(&self) -> u32 {
        self.prior_ssthresh
    }
    fn snd_ssthresh(&self) -> u32 {
        self.snd_ssthresh
    }
    fn snd_cwnd(&self) -> u32 {
        self.snd_cwnd
    }
    fn delivered(&self) -> u32 {
        self.delivered
    }
    fn sacked_out(&self) -> u32 {
        self.sacked_out
    }
    fn lost(&self) -> u32 {
        self.lost
    }
    fn total_retrans(&self) -> u32 {
        self.total_retrans
    }
    fn mss_cache(&self) -> u32 {
        self.mss_cache
    }
    fn tlp_high_seq(&self) -> u32 {
        self.tlp_high_seq
    }
    fn rcv_tsecr(&self) -> u32 {
        self.rcv_tsecr
    }
    fn srtt_us_raw(&self) -> u32 {
        self.srtt_us
    }
    fn mdev_us_raw(&self) -> u32 {
        self.mdev_us
    }
    fn rttvar_us_raw(&self) -> u32 {
        self.rttvar_us
    }
    fn min_rtt_us(&self) -> u32 {
        self.min_rtt_us
    }
    fn tcp_mstamp_us(&self) -> u64 {
        self.tcp_mstamp_us
    }
    fn rto(&self) -> u32 {
        self.rto
    }
    fn counters(&self) -> SockCounters {
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_partial_json() {
        let json = r#"{"id": 7, "sampling_tag": 12, "src": "10.0.0.1:443", "dst": "10.0.0.2:5555", "snd_una": 100}"#;
        let sk: SockSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(sk.conn_id(), ConnectionId(7));
        assert_eq!(sk.sampling_tag(), 12);
        assert_eq!(sk.snd_una(), 100);
        assert_eq!(sk.mss_cache(), 1448);
        assert_eq!(sk.ca_name(), "cubic");
    }
}
