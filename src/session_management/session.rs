use std::net::SocketAddr;

use crate::attribution::{AckTrack, CaStateChanges, LossTrack, RttTrack};
use crate::host::accessor::{ConnectionId, SockFields};
use crate::host::types::CcAlgo;
use crate::probes::ProbeVariant;

/// Attribution state for whichever variant created the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantState {
    AckTrace(AckTrack),
    CaLoss(LossTrack),
    RttTrace(RttTrack),
    TcpStats(LossTrack),
}

/// Per-connection state kept between establishment and destroy.
///
/// Plain data only: the table hands out exclusive access to one session at a
/// time and the probes mutate it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: ConnectionId,
    pub created_at_ns: u64,
    pub conn_tstamp_ns: u64,
    /// `snd_una` at establishment, zero point for sequence arithmetic.
    pub baseline_seq: u32,
    pub sampling_tag: u16,
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub start_us: u64,
    pub min_rtt_on_establish: u32,
    /// Resolved on the first CA-state change.
    pub cc_algo: CcAlgo,
    pub ca_changes: CaStateChanges,
    pub state: VariantState,
}

impl Session {
    pub fn establish<S: SockFields + ?Sized>(
        variant: ProbeVariant,
        sk: &S,
        src: SocketAddr,
        dst: SocketAddr,
    ) -> Self {
        let baseline_seq = sk.snd_una();
        let state = match variant {
            ProbeVariant::AckTrace => VariantState::AckTrace(AckTrack::new(baseline_seq)),
            ProbeVariant::CaLoss => VariantState::CaLoss(LossTrack::new()),
            ProbeVariant::RttTrace => VariantState::RttTrace(RttTrack::new(baseline_seq)),
            ProbeVariant::TcpStats => VariantState::TcpStats(LossTrack::new()),
        };
        Self {
            id: sk.conn_id(),
            created_at_ns: sk.ktime_ns(),
            conn_tstamp_ns: sk.conn_tstamp_ns(),
            baseline_seq,
            sampling_tag: sk.sampling_tag(),
            src,
            dst,
            start_us: sk.ktime_ns() / 1_000,
            min_rtt_on_establish: sk.min_rtt_us(),
            cc_algo: CcAlgo::Unset,
            ca_changes: CaStateChanges::default(),
            state,
        }
    }

    pub fn variant(&self) -> ProbeVariant {
        match self.state {
            VariantState::AckTrace(_) => ProbeVariant::AckTrace,
            VariantState::CaLoss(_) => ProbeVariant::CaLoss,
            VariantState::RttTrace(_) => ProbeVariant::RttTrace,
            VariantState::TcpStats(_) => ProbeVariant::TcpStats,
        }
    }

    /// Loss tracker, for the variants that attribute CA-state changes.
    pub fn loss_track_mut(&mut self) -> Option<&mut LossTrack> {
        match &mut self.state {
            VariantState::CaLoss(lts) | VariantState::TcpStats(lts) => Some(lts),
            _ => None,
        }
    }

    pub fn loss_track(&self) -> Option<&LossTrack> {
        match &self.state {
            VariantState::CaLoss(lts) | VariantState::TcpStats(lts) => Some(lts),
            _ => None,
        }
    }

    /// Congestion-control algorithm, looked up once and cached.
    pub fn resolve_cc_algo<S: SockFields + ?Sized>(&mut self, sk: &S) -> CcAlgo {
        if self.cc_algo == CcAlgo::Unset {
            self.cc_algo = CcAlgo::from_name(sk.ca_name());
        }
        self.cc_algo
    }
}
