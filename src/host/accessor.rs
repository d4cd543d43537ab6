//! Field accessor layer.
//!
//! Probes never look at host memory directly. They read named fields through
//! [`SockFields`], and any field whose encoding depends on the host's internal
//! layout (packed bitfields, clock units) is decoded by a [`HostLayout`]. When
//! the host changes layout only this module needs a new variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::error_handling::types::FieldError;

use super::types::{CaState, SackedFlags, AF_INET, AF_INET6};

const NSEC_PER_USEC: u64 = 1_000;
const NSEC_PER_SEC: u64 = 1_000_000_000;
const USEC_PER_SEC: u64 = 1_000_000;
/// Resolution of TCP timestamp options.
const TCP_TS_HZ: u64 = 1_000;

/// Opaque identity of a live connection, stable for the socket's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Counters read only when a full stats snapshot is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SockCounters {
    pub segs_in: u32,
    pub segs_out: u32,
    pub data_segs_in: u32,
    pub data_segs_out: u32,
    pub bytes_received: u64,
    pub bytes_acked: u64,
    pub bytes_retrans: u64,
    pub delivered_ce: u32,
    pub first_tx_mstamp: u64,
    pub delivered_mstamp: u64,
    /// Busy, rwnd-limited and sndbuf-limited chrono stats, in jiffies.
    pub chrono_stat: [u32; 3],
    pub pacing_status: u32,
    pub pacing_rate: u64,
    pub max_pacing_rate: u64,
    pub sndbuf: i32,
    pub rcvbuf: i32,
    pub sk_shutdown: i32,
    pub sk_err: i32,
    pub sk_err_soft: i32,
}

/// Named read access to a socket's state at the moment a probe fires.
pub trait SockFields {
    fn conn_id(&self) -> ConnectionId;

    /// Pseudo-random value assigned by the host when the socket was created.
    fn sampling_tag(&self) -> u16;

    /// Host monotonic clock at the time of the event, in nanoseconds.
    fn ktime_ns(&self) -> u64;

    /// Host clock when the socket was initialised, in nanoseconds.
    fn conn_tstamp_ns(&self) -> u64;

    fn family(&self) -> u16;
    fn local_addr(&self) -> SocketAddr;
    fn remote_addr(&self) -> SocketAddr;

    fn sk_state_raw(&self) -> u8;
    /// Byte holding the CA state in its low bits.
    fn ca_bits_raw(&self) -> u8;
    /// Bitfield that follows `rcv_tsecr` in the receive options.
    fn rx_opt_bits_raw(&self) -> u16;
    fn ca_name(&self) -> &str;

    fn snd_una(&self) -> u32;
    fn snd_nxt(&self) -> u32;
    fn high_seq(&self) -> u32;
    fn undo_marker(&self) -> u32;
    fn prior_ssthresh(&self) -> u32;
    fn snd_ssthresh(&self) -> u32;
    fn snd_cwnd(&self) -> u32;
    fn delivered(&self) -> u32;
    fn sacked_out(&self) -> u32;
    fn lost(&self) -> u32;
    fn total_retrans(&self) -> u32;
    fn mss_cache(&self) -> u32;
    fn tlp_high_seq(&self) -> u32;
    fn rcv_tsecr(&self) -> u32;
    /// Scaled smoothed RTT (`srtt << 3`).
    fn srtt_us_raw(&self) -> u32;
    /// Scaled mean deviation (`mdev << 2`).
    fn mdev_us_raw(&self) -> u32;
    /// Scaled RTT variance (`rttvar << 2`).
    fn rttvar_us_raw(&self) -> u32;
    fn min_rtt_us(&self) -> u32;
    /// Stack timestamp of the most recent ACK processing, in microseconds.
    fn tcp_mstamp_us(&self) -> u64;
    fn rto(&self) -> u32;

    fn counters(&self) -> SockCounters;
}

/// Fields carried by a segment-acknowledged event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckedSegment {
    pub seq: u32,
    pub end_seq: u32,
    /// Sequence number before a partial ACK trimmed the segment.
    pub orig_seq: u32,
    pub fully_acked: bool,
    /// First segment acknowledged by this ACK.
    pub first_acked: bool,
    pub acked_pcount: u32,
    pub sacked: u8,
    /// Transmit time of the segment, in nanoseconds.
    pub skb_mstamp_ns: u64,
    pub tx_delivered: u32,
    pub tx_delivered_mstamp: u64,
    pub tx_first_tx_mstamp: u64,
    /// Packed rate-sample word; bytes in flight live in the low bits.
    pub tx_word: u32,
    /// Stack's own packets-in-flight count when the segment was sent.
    pub packets_in_flight: u32,
    pub tcp_flags: u8,
}

impl AckedSegment {
    pub fn sacked_flags(&self) -> SackedFlags {
        SackedFlags::from_bits_retain(self.sacked)
    }

    /// Segment range that this ACK covers.
    ///
    /// A partially acknowledged segment has already been trimmed, so its
    /// original start and the current `snd_una` are used instead.
    pub fn acked_range<S: SockFields + ?Sized>(&self, sk: &S) -> (u32, u32) {
        if self.fully_acked {
            (self.seq, self.end_seq)
        } else {
            (self.orig_seq, sk.snd_una())
        }
    }
}

/// Known host layouts for fields that are not plain named members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HostLayout {
    #[default]
    #[serde(rename = "linux_5_4")]
    Linux54,
}

impl HostLayout {
    fn ca_state_mask(self) -> u8 {
        match self {
            HostLayout::Linux54 => 0x3F,
        }
    }

    fn saw_tstamp_mask(self) -> u16 {
        // Little-endian bitfield, first declared bit.
        match self {
            HostLayout::Linux54 => 0x0001,
        }
    }

    fn tx_in_flight_mask(self) -> u32 {
        match self {
            HostLayout::Linux54 => 0x00FF_FFFF,
        }
    }

    fn jiffies_hz(self) -> u64 {
        match self {
            HostLayout::Linux54 => 1_000,
        }
    }

    /// CA-state bits as stored, without validating the value.
    pub fn ca_state_raw<S: SockFields + ?Sized>(self, sk: &S) -> u8 {
        sk.ca_bits_raw() & self.ca_state_mask()
    }

    pub fn ca_state<S: SockFields + ?Sized>(self, sk: &S) -> Result<CaState, FieldError> {
        CaState::try_from(self.ca_state_raw(sk))
    }

    pub fn saw_tstamp<S: SockFields + ?Sized>(self, sk: &S) -> bool {
        sk.rx_opt_bits_raw() & self.saw_tstamp_mask() != 0
    }

    pub fn tx_in_flight(self, seg: &AckedSegment) -> u32 {
        seg.tx_word & self.tx_in_flight_mask()
    }

    pub fn jiffies_to_us(self, jiffies: u32) -> u64 {
        jiffies as u64 * (USEC_PER_SEC / self.jiffies_hz())
    }

    /// Segment transmit time in TCP timestamp-option units.
    pub fn skb_tsval(self, seg: &AckedSegment) -> u32 {
        (seg.skb_mstamp_ns / (NSEC_PER_SEC / TCP_TS_HZ)) as u32
    }

    pub fn skb_timestamp_us(self, seg: &AckedSegment) -> u64 {
        seg.skb_mstamp_ns / NSEC_PER_USEC
    }

    /// Source and destination endpoints, or `None` for families other than
    /// IPv4 and IPv6.
    pub fn endpoints<S: SockFields + ?Sized>(self, sk: &S) -> Option<(SocketAddr, SocketAddr)> {
        let (src, dst) = (sk.local_addr(), sk.remote_addr());
        match (sk.family(), src, dst) {
            (AF_INET, SocketAddr::V4(_), SocketAddr::V4(_)) => Some((src, dst)),
            (AF_INET6, SocketAddr::V6(_), SocketAddr::V6(_)) => Some((src, dst)),
            _ => None,
        }
    }
}

impl fmt::Display for HostLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostLayout::Linux54 => write!(f, "linux_5_4"),
        }
    }
}

/// Returns `true` if sequence number `a` precedes `b` in modular order.
#[inline]
pub fn seq_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::snapshot::SockSnapshot;

    #[test]
    fn test_ca_state_decoding_masks_high_bits() {
        let mut sk = SockSnapshot::default();
        sk.ca_bits = 0xC3;
        assert_eq!(HostLayout::Linux54.ca_state(&sk).unwrap(), CaState::Recovery);
        sk.ca_bits = 0x07;
        assert!(HostLayout::Linux54.ca_state(&sk).is_err());
    }

    #[test]
    fn test_seq_before_wraps() {
        assert!(seq_before(1, 2));
        assert!(!seq_before(2, 1));
        assert!(seq_before(u32::MAX - 5, 3));
    }

    #[test]
    fn test_partial_ack_range_uses_snd_una() {
        let mut sk = SockSnapshot::default();
        sk.snd_una = 5_000;
        let seg = AckedSegment {
            seq: 4_500,
            end_seq: 6_000,
            orig_seq: 4_000,
            fully_acked: false,
            ..Default::default()
        };
        assert_eq!(seg.acked_range(&sk), (4_000, 5_000));
    }

    #[test]
    fn test_endpoints_reject_unknown_family() {
        let mut sk = SockSnapshot::default();
        assert!(HostLayout::Linux54.endpoints(&sk).is_some());
        sk.family = 1;
        assert!(HostLayout::Linux54.endpoints(&sk).is_none());
    }
}
