//! Probe entry points invoked on stack events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Submodule for the probe dispatcher.
pub mod dispatcher;

pub use dispatcher::{DispatchStats, ProbeDispatcher, ProbeSettings};

/// Which attribution the probes run, and so which payload they emit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ProbeVariant {
    /// Retransmission classification from acknowledged segments.
    AckTrace,
    /// Loss attribution from CA-state changes.
    CaLoss,
    /// Per-segment RTT samples.
    RttTrace,
    /// Full statistics snapshot with CA-state loss attribution.
    #[default]
    TcpStats,
}

impl ProbeVariant {
    pub fn name(self) -> &'static str {
        match self {
            ProbeVariant::AckTrace => "ack_trace",
            ProbeVariant::CaLoss => "ca_loss",
            ProbeVariant::RttTrace => "rtt_trace",
            ProbeVariant::TcpStats => "tcp_stats",
        }
    }

    /// Variants that subscribe to segment-acknowledged events.
    pub fn uses_acks(self) -> bool {
        matches!(self, ProbeVariant::AckTrace | ProbeVariant::RttTrace)
    }

    /// Variants that subscribe to CA-state changes.
    pub fn uses_ca_state(self) -> bool {
        matches!(self, ProbeVariant::CaLoss | ProbeVariant::TcpStats)
    }
}

impl fmt::Display for ProbeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
