//! Loss attribution from congestion-avoidance state transitions.
//!
//! The tracker follows the sequence `Open/Disorder -> CWR | Recovery | Loss
//! -> ... -> Open/Disorder` and commits at most one loss verdict per session,
//! the first one. Entering a loss episode saves a baseline (`snd_nxt`,
//! `snd_una`, `prior_ssthresh` and a first-lost-segment estimate). Leaving it
//! either commits the verdict or decides the episode was undone.
//!
//! Anything that does not fit the expected sequence is fail-stop: the session
//! is marked with a [`LossTrackError`] and never attributed again. Sessions
//! that send more than the tracking cutoff without a pending loss are marked
//! `done` instead.

use serde::Serialize;
use std::fmt;

use crate::counter::Counter;
use crate::host::accessor::SockFields;
use crate::host::types::{CaState, CcAlgo, TCP_INFINITE_SSTHRESH};

/// Default number of segments tracked before attribution stops.
pub const DEFAULT_TRACKING_CUTOFF: u32 = 64;

/// Why a loss verdict was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum LossReason {
    NormalRecovery = 0x1,
    TlpConfirmed = 0x2,
    LossWithPartialAcks = 0x4,
}

impl LossReason {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x1 => Some(LossReason::NormalRecovery),
            0x2 => Some(LossReason::TlpConfirmed),
            0x4 => Some(LossReason::LossWithPartialAcks),
            _ => None,
        }
    }
}

/// Why attribution stopped for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum LossTrackError {
    MissedTransition = 1 << 0,
    WrongHighSeq = 1 << 1,
    LossWithInfiniteSsthresh = 1 << 2,
    PriorSsthreshZeroInRecovery = 1 << 3,
    RecoveryToRecovery = 1 << 4,
    /// A stack field could not be decoded with the configured host layout.
    FieldDecode = 1 << 5,
}

impl LossTrackError {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(LossTrackError::MissedTransition),
            0x02 => Some(LossTrackError::WrongHighSeq),
            0x04 => Some(LossTrackError::LossWithInfiniteSsthresh),
            0x08 => Some(LossTrackError::PriorSsthreshZeroInRecovery),
            0x10 => Some(LossTrackError::RecoveryToRecovery),
            0x20 => Some(LossTrackError::FieldDecode),
            _ => None,
        }
    }
}

impl fmt::Display for LossTrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LossTrackError::MissedTransition => "missed transition",
            LossTrackError::WrongHighSeq => "wrong high_seq",
            LossTrackError::LossWithInfiniteSsthresh => "loss with infinite ssthresh",
            LossTrackError::PriorSsthreshZeroInRecovery => "prior_ssthresh zero in recovery",
            LossTrackError::RecoveryToRecovery => "recovery to recovery",
            LossTrackError::FieldDecode => "field decode",
        };
        f.write_str(name)
    }
}

/// Baseline captured when a loss episode starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LossEntry {
    pub snd_nxt: u32,
    pub snd_una: u32,
    pub prior_ssthresh: u32,
    pub first_lost_packet: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LossTrackStats {
    pub set_loss_count: Counter<u8>,
    pub undo_count: Counter<u8>,
    pub undone_undo_marker: Counter<u8>,
    pub undone_mtu_probing: Counter<u8>,
    pub undone_ssthresh_infinite: Counter<u8>,
    pub transitions_loss_to_loss: Counter<u8>,
    pub transitions_open_to_open: Counter<u8>,
    pub transitions_recovery_to_loss: Counter<u8>,
    pub transitions_after_done: Counter<u8>,
    pub recovery_to_loss_with_partial_acks: Counter<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LossTrack {
    /// State the tracker expects the next transition to start from.
    pub old_state: CaState,
    pub enter: LossEntry,
    pub first_lost_packet: u16,
    pub reason: Option<LossReason>,
    pub error: Option<LossTrackError>,
    pub done: bool,
    pub stats: LossTrackStats,
}

impl Default for LossTrack {
    fn default() -> Self {
        Self {
            old_state: CaState::Open,
            enter: LossEntry::default(),
            first_lost_packet: 0,
            reason: None,
            error: None,
            done: false,
            stats: LossTrackStats::default(),
        }
    }
}

impl LossTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_verdict(&self) -> bool {
        self.reason.is_some()
    }

    /// Marks the session failed; nothing is attributed afterwards.
    pub fn set_error(&mut self, err: LossTrackError) {
        self.reset();
        self.error = Some(err);
    }

    /// Records that a transition could not be decoded. Ignored once the
    /// session has already stopped attributing.
    pub fn record_decode_failure(&mut self) {
        if self.error.is_none() && !self.done {
            self.set_error(LossTrackError::FieldDecode);
        }
    }

    /// Handles one CA-state change. `old` is the state the stack reports
    /// before the change, `cc` the session's congestion-control algorithm.
    pub fn on_transition<S: SockFields + ?Sized>(
        &mut self,
        sk: &S,
        cc: CcAlgo,
        old: CaState,
        new: CaState,
        cutoff: u32,
    ) {
        if self.error.is_some() {
            return;
        }
        if sk.delivered().wrapping_sub(sk.sacked_out()) > cutoff
            && self.enter.first_lost_packet == 0
        {
            // reset() must run whenever an episode ends for this to hold.
            self.done = true;
        }
        if self.done {
            self.stats.transitions_after_done.incr();
            return;
        }
        if old != self.old_state {
            self.set_error(LossTrackError::MissedTransition);
            return;
        }
        self.old_state = new;

        let infinite_ssthresh =
            cc == CcAlgo::Cubic && sk.snd_ssthresh() == TCP_INFINITE_SSTHRESH;

        // Only catches undos that happen after the verdict was committed;
        // earlier undos never commit one.
        if infinite_ssthresh && self.has_verdict() {
            self.stats.undone_ssthresh_infinite.incr();
            self.undo();
        }

        match new {
            CaState::Open | CaState::Disorder => self.handle_open(sk, infinite_ssthresh, old),
            CaState::Cwr => {
                // TLP-confirmed: the stack goes straight back to Open and
                // never undoes it.
                self.save(sk);
                self.set_loss(LossReason::TlpConfirmed);
            }
            CaState::Recovery => {
                if old == CaState::Recovery {
                    self.set_error(LossTrackError::RecoveryToRecovery);
                    return;
                }
                if sk.prior_ssthresh() == 0 {
                    self.set_error(LossTrackError::PriorSsthreshZeroInRecovery);
                    return;
                }
                self.enter_loss_episode(sk, old);
            }
            CaState::Loss => self.enter_loss_episode(sk, old),
        }
    }

    fn enter_loss_episode<S: SockFields + ?Sized>(&mut self, sk: &S, old: CaState) {
        let window_moved =
            sk.snd_una() != self.enter.snd_una || sk.snd_nxt() != self.enter.snd_nxt;
        match old {
            CaState::Recovery => {
                self.stats.transitions_recovery_to_loss.incr();
                self.stats
                    .recovery_to_loss_with_partial_acks
                    .incr_if(window_moved);
            }
            CaState::Loss => {
                self.stats.transitions_loss_to_loss.incr();
                if window_moved {
                    // Part of the window got through but some segments are
                    // still missing; charge the loss to the first one seen.
                    self.set_loss(LossReason::LossWithPartialAcks);
                    self.reset();
                }
            }
            _ => self.save(sk),
        }
    }

    fn handle_open<S: SockFields + ?Sized>(&mut self, sk: &S, infinite_ssthresh: bool, old: CaState) {
        if old.is_open() {
            self.stats.transitions_open_to_open.incr();
            self.reset();
            return;
        }
        if self.enter.prior_ssthresh == 0 {
            // MTU probing, not a loss.
            self.stats.undone_mtu_probing.incr();
            self.reset();
            return;
        }
        if self.enter.snd_nxt != sk.high_seq() {
            // high_seq also moves on re-entering Loss and on F-RTO, so this
            // is conservative.
            self.set_error(LossTrackError::WrongHighSeq);
            return;
        }
        if old.is_loss_episode() && sk.undo_marker() == 0 {
            self.stats.undone_undo_marker.incr();
            self.reset();
            return;
        }
        if infinite_ssthresh {
            // Unreachable: the undo in on_transition already cleared the
            // verdict. Kept alongside the other error codes.
            if self.has_verdict() {
                self.set_error(LossTrackError::LossWithInfiniteSsthresh);
                return;
            }
            self.reset();
            return;
        }
        self.set_loss(LossReason::NormalRecovery);
        self.reset();
    }

    fn save<S: SockFields + ?Sized>(&mut self, sk: &S) {
        let first_lost = sk.delivered().wrapping_sub(sk.sacked_out());
        self.enter = LossEntry {
            snd_nxt: sk.snd_nxt(),
            snd_una: sk.snd_una(),
            prior_ssthresh: sk.prior_ssthresh(),
            first_lost_packet: u16::try_from(first_lost).unwrap_or(u16::MAX),
        };
    }

    fn set_loss(&mut self, reason: LossReason) {
        if self.reason.is_none() {
            self.stats.set_loss_count.incr();
            self.first_lost_packet = self.enter.first_lost_packet;
            self.reason = Some(reason);
        }
    }

    fn reset(&mut self) {
        self.enter = LossEntry::default();
    }

    fn undo(&mut self) {
        self.stats.undo_count.incr();
        self.reset();
        self.first_lost_packet = 0;
        self.reason = None;
    }
}

/// Per-session tally of CA-state changes, by destination state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaStateChanges {
    pub count: Counter<u16>,
    pub open_disorder: Counter<u16>,
    pub cwr: Counter<u16>,
    pub recovery: Counter<u16>,
    pub loss: Counter<u16>,
}

impl CaStateChanges {
    pub fn record(&mut self, new: CaState) {
        self.count.incr();
        match new {
            CaState::Open | CaState::Disorder => self.open_disorder.incr(),
            CaState::Cwr => self.cwr.incr(),
            CaState::Recovery => self.recovery.incr(),
            CaState::Loss => self.loss.incr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::snapshot::SockSnapshot;

    fn sock() -> SockSnapshot {
        SockSnapshot {
            snd_una: 1_000,
            snd_nxt: 11_000,
            high_seq: 11_000,
            undo_marker: 1_000,
            prior_ssthresh: 20,
            snd_ssthresh: 10,
            delivered: 8,
            ..Default::default()
        }
    }

    fn step(track: &mut LossTrack, sk: &SockSnapshot, old: CaState, new: CaState) {
        track.on_transition(sk, CcAlgo::Cubic, old, new, DEFAULT_TRACKING_CUTOFF);
    }

    #[test]
    fn test_open_recovery_open_commits_once() {
        let sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Recovery);
        assert_eq!(track.enter.snd_nxt, 11_000);
        assert_eq!(track.enter.first_lost_packet, 8);
        step(&mut track, &sk, CaState::Recovery, CaState::Open);

        assert_eq!(track.reason, Some(LossReason::NormalRecovery));
        assert_eq!(track.first_lost_packet, 8);
        assert_eq!(track.stats.set_loss_count.get(), 1);
        assert_eq!(track.enter, LossEntry::default());
        assert!(track.error.is_none());
    }

    #[test]
    fn test_open_recovery_loss_open_commits_once() {
        let sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Recovery);
        step(&mut track, &sk, CaState::Recovery, CaState::Loss);
        step(&mut track, &sk, CaState::Loss, CaState::Open);

        assert_eq!(track.stats.transitions_recovery_to_loss.get(), 1);
        assert_eq!(track.stats.recovery_to_loss_with_partial_acks.get(), 0);
        assert_eq!(track.stats.set_loss_count.get(), 1);
        assert_eq!(track.reason, Some(LossReason::NormalRecovery));
    }

    #[test]
    fn test_missed_transition_is_fail_stop() {
        let sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Loss, CaState::Open);
        assert_eq!(track.error, Some(LossTrackError::MissedTransition));

        step(&mut track, &sk, CaState::Open, CaState::Recovery);
        step(&mut track, &sk, CaState::Recovery, CaState::Open);
        assert!(track.reason.is_none());
        assert_eq!(track.stats.set_loss_count.get(), 0);
    }

    #[test]
    fn test_recovery_without_prior_ssthresh_is_error() {
        let mut sk = sock();
        sk.prior_ssthresh = 0;
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Recovery);
        assert_eq!(track.error, Some(LossTrackError::PriorSsthreshZeroInRecovery));
    }

    #[test]
    fn test_loss_entered_without_prior_ssthresh_is_mtu_probe() {
        let mut sk = sock();
        sk.prior_ssthresh = 0;
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Loss);
        step(&mut track, &sk, CaState::Loss, CaState::Open);
        assert_eq!(track.stats.undone_mtu_probing.get(), 1);
        assert!(track.reason.is_none());
        assert!(track.error.is_none());
    }

    #[test]
    fn test_high_seq_mismatch_is_error() {
        let mut sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Loss);
        sk.high_seq = 12_000;
        step(&mut track, &sk, CaState::Loss, CaState::Open);
        assert_eq!(track.error, Some(LossTrackError::WrongHighSeq));
        assert!(track.reason.is_none());
    }

    #[test]
    fn test_cleared_undo_marker_means_undone() {
        let mut sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Recovery);
        sk.undo_marker = 0;
        step(&mut track, &sk, CaState::Recovery, CaState::Open);
        assert_eq!(track.stats.undone_undo_marker.get(), 1);
        assert!(track.reason.is_none());
    }

    #[test]
    fn test_cwr_commits_tlp_confirmed_loss() {
        let sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Cwr);
        assert_eq!(track.reason, Some(LossReason::TlpConfirmed));
        step(&mut track, &sk, CaState::Cwr, CaState::Open);
        assert_eq!(track.stats.set_loss_count.get(), 1);
        assert_eq!(track.reason, Some(LossReason::TlpConfirmed));
    }

    #[test]
    fn test_loss_to_loss_with_moved_window() {
        let mut sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Loss);
        sk.snd_una = 3_000;
        step(&mut track, &sk, CaState::Loss, CaState::Loss);
        assert_eq!(track.stats.transitions_loss_to_loss.get(), 1);
        assert_eq!(track.reason, Some(LossReason::LossWithPartialAcks));
        assert_eq!(track.first_lost_packet, 8);
        assert_eq!(track.enter, LossEntry::default());
    }

    #[test]
    fn test_recovery_to_recovery_is_fail_stop() {
        let sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Recovery);
        step(&mut track, &sk, CaState::Recovery, CaState::Recovery);
        assert_eq!(track.error, Some(LossTrackError::RecoveryToRecovery));

        step(&mut track, &sk, CaState::Recovery, CaState::Open);
        assert!(track.reason.is_none());
        assert_eq!(track.stats.set_loss_count.get(), 0);
    }

    #[test]
    fn test_recovery_to_loss_with_moved_window() {
        let mut sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Recovery);
        sk.snd_una = 4_000;
        step(&mut track, &sk, CaState::Recovery, CaState::Loss);

        assert_eq!(track.stats.transitions_recovery_to_loss.get(), 1);
        assert_eq!(track.stats.recovery_to_loss_with_partial_acks.get(), 1);
        // The episode stays open until the return to Open.
        assert!(track.reason.is_none());
        assert_eq!(track.enter.snd_una, 1_000);
        assert!(track.error.is_none());
    }

    #[test]
    fn test_open_to_disorder_resets_entry() {
        let sk = sock();
        let mut track = LossTrack::new();
        track.enter = LossEntry {
            snd_nxt: 5_000,
            snd_una: 2_000,
            prior_ssthresh: 20,
            first_lost_packet: 3,
        };
        step(&mut track, &sk, CaState::Open, CaState::Disorder);

        assert_eq!(track.stats.transitions_open_to_open.get(), 1);
        assert_eq!(track.enter, LossEntry::default());
        assert!(track.reason.is_none());
        assert!(track.error.is_none());

        step(&mut track, &sk, CaState::Disorder, CaState::Open);
        assert_eq!(track.stats.transitions_open_to_open.get(), 2);
    }

    #[test]
    fn test_cubic_infinite_ssthresh_undoes_verdict() {
        let mut sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Cwr);
        assert!(track.has_verdict());
        step(&mut track, &sk, CaState::Cwr, CaState::Open);

        sk.snd_ssthresh = TCP_INFINITE_SSTHRESH;
        step(&mut track, &sk, CaState::Open, CaState::Disorder);
        assert!(!track.has_verdict());
        assert_eq!(track.stats.undone_ssthresh_infinite.get(), 1);
        assert_eq!(track.stats.undo_count.get(), 1);
    }

    #[test]
    fn test_infinite_ssthresh_ignored_for_other_algorithms() {
        let mut sk = sock();
        let mut track = LossTrack::new();
        track.on_transition(&sk, CcAlgo::Bbr, CaState::Open, CaState::Cwr, 64);
        sk.snd_ssthresh = TCP_INFINITE_SSTHRESH;
        track.on_transition(&sk, CcAlgo::Bbr, CaState::Cwr, CaState::Open, 64);
        assert!(track.has_verdict());
        assert_eq!(track.stats.undo_count.get(), 0);
    }

    #[test]
    fn test_cutoff_sets_done_without_error() {
        let mut sk = sock();
        sk.delivered = 65;
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Recovery);
        assert!(track.done);
        assert!(track.error.is_none());
        assert_eq!(track.stats.transitions_after_done.get(), 1);
        step(&mut track, &sk, CaState::Recovery, CaState::Open);
        assert_eq!(track.stats.transitions_after_done.get(), 2);
        assert!(track.reason.is_none());
    }

    #[test]
    fn test_pending_episode_survives_cutoff() {
        let mut sk = sock();
        let mut track = LossTrack::new();
        step(&mut track, &sk, CaState::Open, CaState::Recovery);
        sk.delivered = 200;
        step(&mut track, &sk, CaState::Recovery, CaState::Open);
        assert!(!track.done);
        assert_eq!(track.reason, Some(LossReason::NormalRecovery));
    }

    #[test]
    fn test_decode_failure_keeps_first_error() {
        let mut track = LossTrack::new();
        track.record_decode_failure();
        assert_eq!(track.error, Some(LossTrackError::FieldDecode));

        let mut track = LossTrack::new();
        track.set_error(LossTrackError::WrongHighSeq);
        track.record_decode_failure();
        assert_eq!(track.error, Some(LossTrackError::WrongHighSeq));
    }

    #[test]
    fn test_ca_state_changes() {
        let mut changes = CaStateChanges::default();
        changes.record(CaState::Recovery);
        changes.record(CaState::Disorder);
        changes.record(CaState::Open);
        assert_eq!(changes.count.get(), 3);
        assert_eq!(changes.open_disorder.get(), 2);
        assert_eq!(changes.recovery.get(), 1);
        assert_eq!(changes.cwr.get(), 0);
    }
}
