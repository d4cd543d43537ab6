//! Stack-side enumerations and flag sets shared by the probes.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error_handling::types::FieldError;

/// `snd_ssthresh` value the stack uses while still in initial slow start.
pub const TCP_INFINITE_SSTHRESH: u32 = 0x7fff_ffff;

pub const AF_INET: u16 = 2;
pub const AF_INET6: u16 = 10;

/// Congestion-avoidance state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CaState {
    Open = 0,
    Disorder = 1,
    Cwr = 2,
    Recovery = 3,
    Loss = 4,
}

impl CaState {
    /// `Open` and `Disorder` carry no loss episode.
    pub fn is_open(self) -> bool {
        self <= CaState::Disorder
    }

    pub fn is_loss_episode(self) -> bool {
        matches!(self, CaState::Recovery | CaState::Loss)
    }

    pub fn name(self) -> &'static str {
        match self {
            CaState::Open => "TCP_CA_Open",
            CaState::Disorder => "TCP_CA_Disorder",
            CaState::Cwr => "TCP_CA_CWR",
            CaState::Recovery => "TCP_CA_Recovery",
            CaState::Loss => "TCP_CA_Loss",
        }
    }
}

impl TryFrom<u8> for CaState {
    type Error = FieldError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(CaState::Open),
            1 => Ok(CaState::Disorder),
            2 => Ok(CaState::Cwr),
            3 => Ok(CaState::Recovery),
            4 => Ok(CaState::Loss),
            other => Err(FieldError::UnknownCaState(other)),
        }
    }
}

impl fmt::Display for CaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// INET socket state, numbered as in the stack's `tcp_states.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SockState {
    Established = 1,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    NewSynRecv,
}

impl SockState {
    pub fn name(self) -> &'static str {
        match self {
            SockState::Established => "TCP_ESTABLISHED",
            SockState::SynSent => "TCP_SYN_SENT",
            SockState::SynRecv => "TCP_SYN_RECV",
            SockState::FinWait1 => "TCP_FIN_WAIT1",
            SockState::FinWait2 => "TCP_FIN_WAIT2",
            SockState::TimeWait => "TCP_TIME_WAIT",
            SockState::Close => "TCP_CLOSE",
            SockState::CloseWait => "TCP_CLOSE_WAIT",
            SockState::LastAck => "TCP_LAST_ACK",
            SockState::Listen => "TCP_LISTEN",
            SockState::Closing => "TCP_CLOSING",
            SockState::NewSynRecv => "TCP_NEW_SYN_RECV",
        }
    }
}

impl TryFrom<u8> for SockState {
    type Error = FieldError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        use SockState::*;
        const ALL: [SockState; 12] = [
            Established, SynSent, SynRecv, FinWait1, FinWait2, TimeWait, Close, CloseWait,
            LastAck, Listen, Closing, NewSynRecv,
        ];
        raw.checked_sub(1)
            .and_then(|i| ALL.get(i as usize).copied())
            .ok_or(FieldError::UnknownSockState(raw))
    }
}

/// Congestion-control algorithm, cached per session after the first lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CcAlgo {
    #[default]
    Unset = 0,
    Cubic = 1,
    Bbr = 2,
    Unknown = 0xFF,
}

impl CcAlgo {
    /// Classifies a congestion-control name by prefix.
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("cubic") {
            CcAlgo::Cubic
        } else if name.starts_with("bbr") {
            CcAlgo::Bbr
        } else {
            CcAlgo::Unknown
        }
    }

    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => CcAlgo::Unset,
            1 => CcAlgo::Cubic,
            2 => CcAlgo::Bbr,
            _ => CcAlgo::Unknown,
        }
    }
}

bitflags! {
    /// Per-segment `sacked` tag bits from the stack's control block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SackedFlags: u8 {
        /// Segment ACK'd by a SACK block.
        const SACKED_ACKED = 0x01;
        /// Segment retransmitted.
        const SACKED_RETRANS = 0x02;
        const LOST = 0x04;
        /// Segment repaired (no transmit timestamp).
        const REPAIRED = 0x10;
        /// Segment was retransmitted at least once.
        const EVER_RETRANS = 0x80;
        const RETRANS = Self::SACKED_RETRANS.bits() | Self::EVER_RETRANS.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ca_state_from_raw() {
        assert_eq!(CaState::try_from(3).unwrap(), CaState::Recovery);
        assert!(CaState::try_from(9).is_err());
        assert!(CaState::Disorder.is_open());
        assert!(!CaState::Cwr.is_open());
        assert!(CaState::Loss.is_loss_episode());
    }

    #[test]
    fn test_sock_state_from_raw() {
        assert_eq!(SockState::try_from(1).unwrap(), SockState::Established);
        assert_eq!(SockState::try_from(7).unwrap(), SockState::Close);
        assert!(SockState::try_from(0).is_err());
        assert!(SockState::try_from(13).is_err());
    }

    #[test]
    fn test_cc_algo_prefix_match() {
        assert_eq!(CcAlgo::from_name("cubic"), CcAlgo::Cubic);
        assert_eq!(CcAlgo::from_name("bbr2"), CcAlgo::Bbr);
        assert_eq!(CcAlgo::from_name("reno"), CcAlgo::Unknown);
    }

    #[test]
    fn test_retrans_covers_both_bits() {
        let ever = SackedFlags::EVER_RETRANS;
        assert!(ever.intersects(SackedFlags::RETRANS));
        assert!(!SackedFlags::SACKED_ACKED.intersects(SackedFlags::RETRANS));
    }
}
