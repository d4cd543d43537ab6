//! ACK-based retransmission classification.
//!
//! Every acknowledged segment that carries a retransmission tag is classified
//! as recovered (the retransmission turned out to be unnecessary) or lost.
//! Two independent signals say "recovered":
//!
//! - `timestamp_recovered`: the echoed timestamp on the triggering ACK is
//!   older than the segment's own transmit time, so the receiver got the
//!   original transmission.
//! - `dsack_recovered`: the segment is not tagged as a SACKed retransmission,
//!   so a duplicate SACK rather than a later SACK explains the ACK.
//!
//! Known blind spots, kept as accepted error bounds:
//!
//! - A delayed original followed by a retransmission interleaved with
//!   segments of the same timestamp can echo a timestamp equal to the
//!   retransmission's, which hides `timestamp_recovered`.
//! - A DSACK that arrives after the segment was cumulatively acknowledged
//!   never reaches this probe.
//! - Segments re-joined in the retransmit queue can be reported more than
//!   once, so `segments_lost` may be skewed either way.
//! - A segment retransmitted three or more times where the last two copies
//!   arrive is flagged `timestamp_recovered`; the earlier losses are missed.

use serde::Serialize;

use crate::counter::Counter;
use crate::host::accessor::{seq_before, AckedSegment, HostLayout, SockFields};
use crate::host::types::SackedFlags;

/// Diagnostic counters for the classifier itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AckTraceStats {
    pub calls: Counter<u16>,
    /// Segments whose delivery-rate stamp was already cleared by a SACK.
    pub calls_with_mstamp_zero: Counter<u16>,
    pub tcpcb_sacked_retrans: Counter<u16>,
    pub tcpcb_retrans: Counter<u16>,
    pub spurious_tlp_retrans: Counter<u16>,
    pub fully_acked_after_snd_una: Counter<u16>,
}

/// Position of the first genuinely lost segment, estimated two ways.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FirstLoss {
    pub detected: bool,
    /// Delivered-minus-sacked-out accounting at detection time.
    pub by_stats: u32,
    /// Segment offset from the connection's baseline sequence, one-based.
    pub by_seqnum: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AckTrack {
    pub established_snd_una: u32,
    /// Range of the most recently acknowledged segment.
    pub seq: u32,
    pub end_seq: u32,
    pub segments_lost: Counter<u32>,
    pub dsack_recovered: Counter<u32>,
    pub timestamp_recovered: Counter<u32>,
    pub dsack_and_timestamp_recovered: Counter<u32>,
    pub dsack_or_timestamp_recovered: Counter<u32>,
    pub fake_dsack_recovery_induced_by_lost_tlp: Counter<u32>,
    pub first_loss: FirstLoss,
    pub stats: AckTraceStats,
}

/// Outcome of classifying one acknowledged segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckVerdict {
    NotRetransmitted,
    Recovered { dsack: bool, timestamp: bool },
    Lost,
}

impl AckTrack {
    pub fn new(established_snd_una: u32) -> Self {
        Self {
            established_snd_una,
            ..Default::default()
        }
    }

    pub fn on_ack<S: SockFields + ?Sized>(
        &mut self,
        layout: HostLayout,
        sk: &S,
        seg: &AckedSegment,
    ) -> AckVerdict {
        self.stats.calls.incr();
        // No early return here: SACKed segments never reach this probe.
        self.stats
            .calls_with_mstamp_zero
            .incr_if(seg.tx_delivered_mstamp == 0);

        let (seq, end_seq) = seg.acked_range(sk);
        self.seq = seq;
        self.end_seq = end_seq;

        let sacked = seg.sacked_flags();
        if !sacked.intersects(SackedFlags::RETRANS) {
            return AckVerdict::NotRetransmitted;
        }

        self.stats.tcpcb_retrans.incr();
        self.stats
            .tcpcb_sacked_retrans
            .incr_if(sacked.contains(SackedFlags::SACKED_RETRANS));

        let timestamp = timestamp_recovered(layout, sk, seg);

        if seg.fully_acked && seg.end_seq > sk.snd_una() {
            self.stats.fully_acked_after_snd_una.incr();
        }

        let tlp_probe = sacked.contains(SackedFlags::EVER_RETRANS)
            && sk.tlp_high_seq() == seg.end_seq;

        if tlp_probe && timestamp {
            self.stats.spurious_tlp_retrans.incr();
        }

        let mut dsack = !sacked.contains(SackedFlags::SACKED_RETRANS);
        // A lost probe leaves the segment without SACKED_RETRANS as well.
        if tlp_probe && !timestamp && dsack {
            self.fake_dsack_recovery_induced_by_lost_tlp.incr();
            dsack = false;
        }

        self.dsack_recovered.incr_if(dsack);
        self.timestamp_recovered.incr_if(timestamp);
        self.dsack_and_timestamp_recovered.incr_if(dsack && timestamp);
        self.dsack_or_timestamp_recovered.incr_if(dsack || timestamp);

        if dsack || timestamp {
            return AckVerdict::Recovered { dsack, timestamp };
        }

        self.segments_lost.incr();
        if !self.first_loss.detected {
            self.first_loss = FirstLoss {
                detected: true,
                by_stats: sk
                    .delivered()
                    .wrapping_sub(sk.sacked_out())
                    .wrapping_sub(self.dsack_or_timestamp_recovered.get()),
                by_seqnum: segment_offset(self.established_snd_una, seq, sk.mss_cache())
                    .map_or(0, |n| n.saturating_add(1)),
            };
        }
        AckVerdict::Lost
    }

    /// Retransmissions not explained by DSACK or timestamps.
    pub fn non_spurious_retrans<S: SockFields + ?Sized>(&self, sk: &S) -> u32 {
        sk.total_retrans()
            .saturating_sub(self.dsack_or_timestamp_recovered.get())
    }
}

/// The echoed timestamp predates the segment's own transmission.
fn timestamp_recovered<S: SockFields + ?Sized>(
    layout: HostLayout,
    sk: &S,
    seg: &AckedSegment,
) -> bool {
    let tsecr = sk.rcv_tsecr();
    layout.saw_tstamp(sk) && tsecr != 0 && seq_before(tsecr, layout.skb_tsval(seg))
}

/// Whole segments between `baseline` and `seq`, modulo 2^32.
/// `None` when the MSS is not known yet.
pub(crate) fn segment_offset(baseline: u32, seq: u32, mss: u32) -> Option<u32> {
    seq.wrapping_sub(baseline).checked_div(mss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::snapshot::SockSnapshot;

    const MSS: u32 = 1000;
    const ISN: u32 = 10_000;

    fn sock() -> SockSnapshot {
        SockSnapshot {
            snd_una: ISN,
            mss_cache: MSS,
            // saw_tstamp set
            rx_opt_bits: 0x1,
            ..Default::default()
        }
    }

    fn segment(index: u32, sacked: SackedFlags) -> AckedSegment {
        let seq = ISN.wrapping_add(index * MSS);
        AckedSegment {
            seq,
            end_seq: seq.wrapping_add(MSS),
            orig_seq: seq,
            fully_acked: true,
            first_acked: true,
            acked_pcount: 1,
            sacked: sacked.bits(),
            skb_mstamp_ns: 5_000_000_000,
            tx_delivered_mstamp: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_segment_only_counts_call() {
        let sk = sock();
        let mut track = AckTrack::new(ISN);
        let verdict = track.on_ack(HostLayout::Linux54, &sk, &segment(0, SackedFlags::empty()));
        assert_eq!(verdict, AckVerdict::NotRetransmitted);
        assert_eq!(track.stats.calls.get(), 1);
        assert_eq!(track.stats.tcpcb_retrans.get(), 0);
        assert_eq!(track.segments_lost.get(), 0);
    }

    #[test]
    fn test_dsack_recovery() {
        let sk = sock();
        let mut track = AckTrack::new(ISN);
        let verdict = track.on_ack(HostLayout::Linux54, &sk, &segment(2, SackedFlags::EVER_RETRANS));
        assert_eq!(
            verdict,
            AckVerdict::Recovered {
                dsack: true,
                timestamp: false
            }
        );
        assert_eq!(track.dsack_recovered.get(), 1);
        assert_eq!(track.dsack_or_timestamp_recovered.get(), 1);
        assert_eq!(track.dsack_and_timestamp_recovered.get(), 0);
    }

    #[test]
    fn test_spurious_tlp_counts_timestamp_once() {
        let mut sk = sock();
        let seg = segment(3, SackedFlags::RETRANS);
        sk.tlp_high_seq = seg.end_seq;
        // Segment sent at 5000 ms; echo of 4999 ms predates it.
        sk.rcv_tsecr = 4_999;

        let mut track = AckTrack::new(ISN);
        let verdict = track.on_ack(HostLayout::Linux54, &sk, &seg);

        assert_eq!(
            verdict,
            AckVerdict::Recovered {
                dsack: false,
                timestamp: true
            }
        );
        assert_eq!(track.stats.spurious_tlp_retrans.get(), 1);
        assert_eq!(track.timestamp_recovered.get(), 1);
        assert_eq!(track.dsack_recovered.get(), 0);
        assert_eq!(track.dsack_and_timestamp_recovered.get(), 0);
        assert_eq!(track.dsack_or_timestamp_recovered.get(), 1);
        assert_eq!(track.fake_dsack_recovery_induced_by_lost_tlp.get(), 0);
    }

    #[test]
    fn test_lost_tlp_probe_inverts_dsack() {
        let mut sk = sock();
        let seg = segment(4, SackedFlags::EVER_RETRANS);
        sk.tlp_high_seq = seg.end_seq;
        sk.rcv_tsecr = 6_000;

        let mut track = AckTrack::new(ISN);
        let verdict = track.on_ack(HostLayout::Linux54, &sk, &seg);

        assert_eq!(verdict, AckVerdict::Lost);
        assert_eq!(track.fake_dsack_recovery_induced_by_lost_tlp.get(), 1);
        assert_eq!(track.dsack_recovered.get(), 0);
        assert_eq!(track.segments_lost.get(), 1);
    }

    #[test]
    fn test_first_loss_estimators_agree() {
        let mut sk = sock();
        let mut track = AckTrack::new(ISN);
        for i in 0..5 {
            track.on_ack(HostLayout::Linux54, &sk, &segment(i, SackedFlags::empty()));
        }
        // Sixth segment was retransmitted and the retransmission was needed.
        sk.delivered = 6;
        sk.sacked_out = 0;
        let verdict = track.on_ack(HostLayout::Linux54, &sk, &segment(5, SackedFlags::RETRANS));

        assert_eq!(verdict, AckVerdict::Lost);
        let first = track.first_loss;
        assert!(first.detected);
        assert_eq!(first.by_seqnum, 6);
        assert!(first.by_stats.abs_diff(first.by_seqnum) <= 1);

        // A second loss leaves the first estimate untouched.
        sk.delivered = 9;
        track.on_ack(HostLayout::Linux54, &sk, &segment(8, SackedFlags::RETRANS));
        assert_eq!(track.first_loss, first);
        assert_eq!(track.segments_lost.get(), 2);
    }

    #[test]
    fn test_first_loss_by_seqnum_across_wrap() {
        let baseline = u32::MAX - 1_499;
        let mut sk = sock();
        sk.snd_una = baseline;
        let mut track = AckTrack::new(baseline);
        let seq = baseline.wrapping_add(3 * MSS);
        let seg = AckedSegment {
            seq,
            end_seq: seq.wrapping_add(MSS),
            fully_acked: true,
            sacked: SackedFlags::RETRANS.bits(),
            ..Default::default()
        };
        track.on_ack(HostLayout::Linux54, &sk, &seg);
        assert_eq!(track.first_loss.by_seqnum, 4);
    }

    #[test]
    fn test_non_spurious_retrans_saturates() {
        let mut sk = sock();
        let mut track = AckTrack::new(ISN);
        track.on_ack(HostLayout::Linux54, &sk, &segment(1, SackedFlags::EVER_RETRANS));
        sk.total_retrans = 0;
        assert_eq!(track.non_spurious_retrans(&sk), 0);
        sk.total_retrans = 4;
        assert_eq!(track.non_spurious_retrans(&sk), 3);
    }
}
