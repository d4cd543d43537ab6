//! Fixed-size binary record layout.
//!
//! ```text
//! +--------------+----------------+----------+----------+------+---------+-----+
//! | ev_tstamp_ns | conn_tstamp_ns | src      | dst      | kind | payload | pad |
//! | u64          | u64            | 128 B    | 128 B    | u8   | ...     |     |
//! +--------------+----------------+----------+----------+------+---------+-----+
//! ```
//!
//! Every record occupies exactly [`RECORD_SIZE`] bytes. Integers use native
//! byte order and fields are written positionally with no version tag, so
//! producer and consumer must come from the same build. Endpoints use the
//! `sockaddr_storage` layout: family, port in network order, then the
//! address.

use byteorder::{NativeEndian, NetworkEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::attribution::ack_classifier::{AckTrack, AckTraceStats, FirstLoss};
use crate::attribution::ca_loss::{
    CaStateChanges, LossEntry, LossReason, LossTrack, LossTrackError, LossTrackStats,
};
use crate::attribution::rtt_estimator::{RttSample, RttTraceStats};
use crate::attribution::tcp_stats::{StatsSnapshot, TcpMirror};
use crate::counter::{Counter, CounterWidth};
use crate::error_handling::types::WireError;
use crate::host::types::{CaState, CcAlgo, AF_INET, AF_INET6};

use super::record::{
    AckTracePayload, CaLossPayload, Event, EventHeader, EventKind, EventPayload, RttPayload,
    SockStates, TcpStatsPayload,
};

/// Size of one record on the ring.
pub const RECORD_SIZE: usize = 1024;
/// Size of an encoded endpoint.
pub const SOCKADDR_SIZE: usize = 128;

type WireEndian = NativeEndian;

/// Positional binary encoding.
pub trait WireCodec: Sized {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError>;
    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError>;
}

impl WireCodec for u8 {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        Ok(w.write_u8(*self)?)
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
        Ok(r.read_u8()?)
    }
}

macro_rules! wire_int {
    ($($t:ty => $write:ident, $read:ident);* $(;)?) => {
        $(
            impl WireCodec for $t {
                fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
                    Ok(w.$write::<WireEndian>(*self)?)
                }

                fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
                    Ok(r.$read::<WireEndian>()?)
                }
            }
        )*
    };
}

wire_int! {
    u16 => write_u16, read_u16;
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    i32 => write_i32, read_i32;
}

impl WireCodec for bool {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        u8::from(*self).encode(w)
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
        Ok(u8::decode(r)? != 0)
    }
}

impl<T: CounterWidth + WireCodec> WireCodec for Counter<T> {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        self.get().encode(w)
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
        Ok(Counter::from(T::decode(r)?))
    }
}

impl WireCodec for SocketAddr {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        let mut buf = [0u8; SOCKADDR_SIZE];
        {
            let mut cur = Cursor::new(&mut buf[..]);
            match self {
                SocketAddr::V4(addr) => {
                    cur.write_u16::<WireEndian>(AF_INET)?;
                    cur.write_u16::<NetworkEndian>(addr.port())?;
                    cur.write_all(&addr.ip().octets())?;
                }
                SocketAddr::V6(addr) => {
                    cur.write_u16::<WireEndian>(AF_INET6)?;
                    cur.write_u16::<NetworkEndian>(addr.port())?;
                    cur.write_u32::<NetworkEndian>(addr.flowinfo())?;
                    cur.write_all(&addr.ip().octets())?;
                    cur.write_u32::<WireEndian>(addr.scope_id())?;
                }
            }
        }
        w.write_all(&buf)?;
        Ok(())
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let mut buf = [0u8; SOCKADDR_SIZE];
        r.read_exact(&mut buf)?;
        let mut cur = Cursor::new(&buf[..]);
        let family = cur.read_u16::<WireEndian>()?;
        let port = cur.read_u16::<NetworkEndian>()?;
        match family {
            AF_INET => {
                let mut octets = [0u8; 4];
                cur.read_exact(&mut octets)?;
                Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port)))
            }
            AF_INET6 => {
                let flowinfo = cur.read_u32::<NetworkEndian>()?;
                let mut octets = [0u8; 16];
                cur.read_exact(&mut octets)?;
                let scope_id = cur.read_u32::<WireEndian>()?;
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(octets),
                    port,
                    flowinfo,
                    scope_id,
                )))
            }
            other => Err(WireError::UnknownFamily(other)),
        }
    }
}

impl WireCodec for CaState {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        (*self as u8).encode(w)
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let raw = u8::decode(r)?;
        CaState::try_from(raw).map_err(|_| WireError::InvalidValue("ca_state", raw))
    }
}

impl WireCodec for CcAlgo {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        (*self as u8).encode(w)
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
        Ok(CcAlgo::from_raw(u8::decode(r)?))
    }
}

// Zero encodes "none" for the reason and error codes.
impl WireCodec for Option<LossReason> {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        self.map_or(0, |reason| reason as u8).encode(w)
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
        match u8::decode(r)? {
            0 => Ok(None),
            raw => LossReason::from_raw(raw)
                .map(Some)
                .ok_or(WireError::InvalidValue("loss_reason", raw)),
        }
    }
}

impl WireCodec for Option<LossTrackError> {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        self.map_or(0, |err| err as u8).encode(w)
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
        match u8::decode(r)? {
            0 => Ok(None),
            raw => LossTrackError::from_raw(raw)
                .map(Some)
                .ok_or(WireError::InvalidValue("loss_error", raw)),
        }
    }
}

// Presence flag, then the sample; absent samples are zero-filled so the
// payload keeps its size.
impl WireCodec for Option<RttSample> {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        self.is_some().encode(w)?;
        self.unwrap_or_default().encode(w)
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let present = bool::decode(r)?;
        let sample = RttSample::decode(r)?;
        Ok(present.then_some(sample))
    }
}

macro_rules! wire_struct {
    ($($ty:ident { $($field:ident),* $(,)? })*) => {
        $(
            impl WireCodec for $ty {
                fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
                    $( self.$field.encode(w)?; )*
                    Ok(())
                }

                fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
                    Ok(Self {
                        $( $field: WireCodec::decode(r)?, )*
                    })
                }
            }
        )*
    };
}

wire_struct! {
    EventHeader { ev_tstamp_ns, conn_tstamp_ns, src, dst }
    SockStates { skt_state, ca_state }
    TcpMirror {
        delivered, lost, total_retrans, srtt_us, mdev_us, rttvar_us, min_rtt_us,
        snd_cwnd, snd_una, sacked_out, mss_cache, mstamp_us, rto,
    }
    AckTraceStats {
        calls, calls_with_mstamp_zero, tcpcb_sacked_retrans, tcpcb_retrans,
        spurious_tlp_retrans, fully_acked_after_snd_una,
    }
    FirstLoss { detected, by_stats, by_seqnum }
    AckTrack {
        established_snd_una, seq, end_seq, segments_lost, dsack_recovered,
        timestamp_recovered, dsack_and_timestamp_recovered,
        dsack_or_timestamp_recovered, fake_dsack_recovery_induced_by_lost_tlp,
        first_loss, stats,
    }
    AckTracePayload { track, non_spurious_retrans, tcp }
    LossEntry { snd_nxt, snd_una, prior_ssthresh, first_lost_packet }
    LossTrackStats {
        set_loss_count, undo_count, undone_undo_marker, undone_mtu_probing,
        undone_ssthresh_infinite, transitions_loss_to_loss, transitions_open_to_open,
        transitions_recovery_to_loss, transitions_after_done,
        recovery_to_loss_with_partial_acks,
    }
    LossTrack { old_state, enter, first_lost_packet, reason, error, done, stats }
    CaStateChanges { count, open_disorder, cwr, recovery, loss }
    CaLossPayload { states, cc_algo, loss, ca_changes, tcp }
    RttSample {
        seq, end_seq, packet_num, xmit_timestamp_us, now_timestamp_us, rtt_us,
        tcp_packets_in_flight, tx_bytes_in_flight, tx_packets_in_flight, pcount,
        tx_delivered, tx_delivered_mstamp, tx_first_tx_mstamp, flags, fully_acked, sacked,
    }
    RttTraceStats {
        calls, skbs_with_acked_pcount_zero, skbs_not_first_ack, skbs_retransmitted,
        unexported_packets,
    }
    RttPayload { established_snd_una, sample, stats, tcp }
    StatsSnapshot {
        srtt_us, mdev_us, rttvar_us, min_rtt_us, min_rtt_us_on_establish, snd_ssthresh,
        snd_cwnd, segs_in, segs_out, data_segs_in, data_segs_out, total_retrans,
        bytes_received, bytes_acked, bytes_retrans, delivered, delivered_ce,
        first_tx_mstamp, delivered_mstamp, mss_cache, lost, chrono_busy_us,
        chrono_rwnd_limited_us, chrono_sndbuf_limited_us, pacing_status, pacing_rate,
        max_pacing_rate, sndbuf, rcvbuf, sk_shutdown, sk_err, sk_err_soft, rto,
        start_us, throughput,
    }
    TcpStatsPayload { states, stats, cc_algo, loss, ca_changes }
}

impl WireCodec for Event {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        self.header.encode(w)?;
        (self.kind() as u8).encode(w)?;
        match &self.payload {
            EventPayload::AckTrace(p) => p.encode(w),
            EventPayload::CaLoss(p) => p.encode(w),
            EventPayload::RttTrace(p) => p.encode(w),
            EventPayload::TcpStats(p) => p.encode(w),
        }
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, WireError> {
        let header = EventHeader::decode(r)?;
        let raw = u8::decode(r)?;
        let kind = EventKind::from_raw(raw).ok_or(WireError::UnknownPayloadKind(raw))?;
        let payload = match kind {
            EventKind::AckTrace => EventPayload::AckTrace(AckTracePayload::decode(r)?),
            EventKind::CaLoss => EventPayload::CaLoss(CaLossPayload::decode(r)?),
            EventKind::RttTrace => EventPayload::RttTrace(RttPayload::decode(r)?),
            EventKind::TcpStats => EventPayload::TcpStats(TcpStatsPayload::decode(r)?),
        };
        Ok(Event { header, payload })
    }
}

/// One encoded event, always [`RECORD_SIZE`] bytes.
#[derive(Clone)]
pub struct WireRecord {
    bytes: [u8; RECORD_SIZE],
}

impl WireRecord {
    pub fn encode(event: &Event) -> Result<Self, WireError> {
        let mut bytes = [0u8; RECORD_SIZE];
        event.encode(&mut Cursor::new(&mut bytes[..]))?;
        Ok(Self { bytes })
    }

    pub fn decode(&self) -> Result<Event, WireError> {
        Event::decode(&mut Cursor::new(&self.bytes[..]))
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < RECORD_SIZE {
            return Err(WireError::Truncated {
                expected: RECORD_SIZE,
                got: buf.len(),
            });
        }
        let mut bytes = [0u8; RECORD_SIZE];
        bytes.copy_from_slice(&buf[..RECORD_SIZE]);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
