//! Attribution algorithms run by the probes.
//!
//! Each algorithm owns a small piece of plain-data state stored on the
//! session and is handed exclusive access to it; none of them block or
//! allocate.

/// Retransmission classification from acknowledged segments.
pub mod ack_classifier;
/// Loss attribution from congestion-avoidance state changes.
pub mod ca_loss;
/// RTT and in-flight estimation.
pub mod rtt_estimator;
/// Stack-mirrored statistics.
pub mod tcp_stats;

pub use ack_classifier::{AckTrack, AckVerdict};
pub use ca_loss::{CaStateChanges, LossReason, LossTrack, LossTrackError};
pub use rtt_estimator::{RttSample, RttSkip, RttTrack};
pub use tcp_stats::{StatsSnapshot, TcpMirror};
