//! Event records as delivered to handlers.
//!
//! An [`Event`] is a point-in-time copy of a session plus the stack fields
//! mirrored at the moment it was emitted. It never refers back to the
//! session.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::SocketAddr;

use crate::attribution::ack_classifier::AckTrack;
use crate::attribution::ca_loss::{CaStateChanges, LossTrack};
use crate::attribution::rtt_estimator::{RttSample, RttTraceStats, RttTrack};
use crate::attribution::tcp_stats::{StatsSnapshot, TcpMirror};
use crate::host::accessor::{HostLayout, SockFields};
use crate::host::types::{CaState, CcAlgo, SockState};
use crate::session_management::session::{Session, VariantState};

/// Payload discriminant, carried on the wire after the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    AckTrace = 1,
    CaLoss = 2,
    RttTrace = 3,
    TcpStats = 4,
}

impl EventKind {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(EventKind::AckTrace),
            2 => Some(EventKind::CaLoss),
            3 => Some(EventKind::RttTrace),
            4 => Some(EventKind::TcpStats),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::AckTrace => "ack_trace",
            EventKind::CaLoss => "ca_loss",
            EventKind::RttTrace => "rtt_trace",
            EventKind::TcpStats => "tcp_stats",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventHeader {
    pub ev_tstamp_ns: u64,
    pub conn_tstamp_ns: u64,
    pub src: SocketAddr,
    pub dst: SocketAddr,
}

/// Name exported for a state code the stack reported but we cannot decode.
pub const UNKNOWN_STATE_NAME: &str = "UNKNOWN_ENUM";

/// Socket and CA state at snapshot time, as raw stack values.
///
/// Serializes each raw code next to its symbolic name (`skt_state_name`,
/// `ca_state_name`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SockStates {
    pub skt_state: u8,
    pub ca_state: u8,
}

impl SockStates {
    pub fn capture<S: SockFields + ?Sized>(layout: HostLayout, sk: &S) -> Self {
        Self {
            skt_state: sk.sk_state_raw(),
            ca_state: layout.ca_state_raw(sk),
        }
    }

    pub fn skt_state_name(&self) -> &'static str {
        SockState::try_from(self.skt_state)
            .map(SockState::name)
            .unwrap_or(UNKNOWN_STATE_NAME)
    }

    pub fn ca_state_name(&self) -> &'static str {
        CaState::try_from(self.ca_state)
            .map(CaState::name)
            .unwrap_or(UNKNOWN_STATE_NAME)
    }
}

impl Serialize for SockStates {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SockStates", 4)?;
        state.serialize_field("skt_state", &self.skt_state)?;
        state.serialize_field("skt_state_name", self.skt_state_name())?;
        state.serialize_field("ca_state", &self.ca_state)?;
        state.serialize_field("ca_state_name", self.ca_state_name())?;
        state.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AckTracePayload {
    pub track: AckTrack,
    pub non_spurious_retrans: u32,
    pub tcp: TcpMirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaLossPayload {
    pub states: SockStates,
    pub cc_algo: CcAlgo,
    pub loss: LossTrack,
    pub ca_changes: CaStateChanges,
    pub tcp: TcpMirror,
}

/// RTT record; `sample` is `None` on the terminal summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RttPayload {
    pub established_snd_una: u32,
    pub sample: Option<RttSample>,
    pub stats: RttTraceStats,
    pub tcp: TcpMirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TcpStatsPayload {
    pub states: SockStates,
    pub stats: StatsSnapshot,
    pub cc_algo: CcAlgo,
    pub loss: LossTrack,
    pub ca_changes: CaStateChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    AckTrace(AckTracePayload),
    CaLoss(CaLossPayload),
    RttTrace(RttPayload),
    TcpStats(TcpStatsPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::AckTrace(_) => EventKind::AckTrace,
            EventPayload::CaLoss(_) => EventKind::CaLoss,
            EventPayload::RttTrace(_) => EventKind::RttTrace,
            EventPayload::TcpStats(_) => EventKind::TcpStats,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Event {
    pub header: EventHeader,
    pub payload: EventPayload,
}

impl Event {
    fn header<S: SockFields + ?Sized>(sk: &S, session: &Session) -> EventHeader {
        EventHeader {
            ev_tstamp_ns: sk.ktime_ns(),
            conn_tstamp_ns: session.conn_tstamp_ns,
            src: session.src,
            dst: session.dst,
        }
    }

    /// Terminal record for `session`, taken when the connection goes away.
    pub fn terminal<S: SockFields + ?Sized>(layout: HostLayout, sk: &S, session: &Session) -> Self {
        let payload = match session.state {
            VariantState::AckTrace(track) => EventPayload::AckTrace(AckTracePayload {
                track,
                non_spurious_retrans: track.non_spurious_retrans(sk),
                tcp: TcpMirror::capture(sk),
            }),
            VariantState::CaLoss(loss) => EventPayload::CaLoss(CaLossPayload {
                states: SockStates::capture(layout, sk),
                cc_algo: session.cc_algo,
                loss,
                ca_changes: session.ca_changes,
                tcp: TcpMirror::capture(sk),
            }),
            VariantState::RttTrace(track) => EventPayload::RttTrace(RttPayload {
                established_snd_una: track.established_snd_una,
                sample: None,
                stats: track.stats,
                tcp: TcpMirror::capture(sk),
            }),
            VariantState::TcpStats(loss) => EventPayload::TcpStats(TcpStatsPayload {
                states: SockStates::capture(layout, sk),
                stats: StatsSnapshot::capture(
                    layout,
                    sk,
                    session.start_us,
                    session.min_rtt_on_establish,
                    sk.ktime_ns() / 1_000,
                ),
                cc_algo: session.cc_algo,
                loss,
                ca_changes: session.ca_changes,
            }),
        };
        Self {
            header: Self::header(sk, session),
            payload,
        }
    }

    /// Record for one accepted RTT sample.
    pub fn rtt_sample<S: SockFields + ?Sized>(
        sk: &S,
        session: &Session,
        track: &RttTrack,
        sample: RttSample,
    ) -> Self {
        Self {
            header: Self::header(sk, session),
            payload: EventPayload::RttTrace(RttPayload {
                established_snd_una: track.established_snd_una,
                sample: Some(sample),
                stats: track.stats,
                tcp: TcpMirror::capture(sk),
            }),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
