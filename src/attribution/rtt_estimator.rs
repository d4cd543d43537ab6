//! Per-segment RTT and in-flight estimation.
//!
//! Only the first segment of an ACK batch that was never retransmitted yields
//! a sample. Each sample carries two in-flight estimates for cross-checking:
//! one from the delivery-rate bookkeeping stored on the segment, one from the
//! stack's own packets-in-flight counter. They differ when segments are
//! delivered out of order, since the former ignores SACKed data.

use serde::Serialize;

use crate::counter::Counter;
use crate::host::accessor::{AckedSegment, HostLayout, SockFields};
use crate::host::types::SackedFlags;

use super::ack_classifier::segment_offset;

/// Default packet number after which samples stop being exported.
pub const DEFAULT_RTT_EXPORT_CUTOFF: u32 = 72;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RttTraceStats {
    pub calls: Counter<u16>,
    pub skbs_with_acked_pcount_zero: Counter<u16>,
    pub skbs_not_first_ack: Counter<u16>,
    pub skbs_retransmitted: Counter<u16>,
    pub unexported_packets: Counter<u16>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RttSample {
    pub seq: u32,
    pub end_seq: u32,
    pub packet_num: u32,
    pub xmit_timestamp_us: u64,
    pub now_timestamp_us: u64,
    pub rtt_us: u32,
    pub tcp_packets_in_flight: u32,
    pub tx_bytes_in_flight: u32,
    pub tx_packets_in_flight: u32,
    pub pcount: u32,
    pub tx_delivered: u32,
    pub tx_delivered_mstamp: u64,
    pub tx_first_tx_mstamp: u64,
    pub flags: u8,
    pub fully_acked: bool,
    pub sacked: u8,
}

/// Reason an acknowledged segment produced no sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RttSkip {
    AckedPcountZero,
    NotFirstAck,
    Retransmitted,
    PastExportCutoff,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RttTrack {
    pub established_snd_una: u32,
    pub stats: RttTraceStats,
}

impl RttTrack {
    pub fn new(established_snd_una: u32) -> Self {
        Self {
            established_snd_una,
            stats: RttTraceStats::default(),
        }
    }

    pub fn on_ack<S: SockFields + ?Sized>(
        &mut self,
        layout: HostLayout,
        sk: &S,
        seg: &AckedSegment,
        export_cutoff: u32,
    ) -> Result<RttSample, RttSkip> {
        self.stats.calls.incr();

        if seg.acked_pcount == 0 {
            self.stats.skbs_with_acked_pcount_zero.incr();
            return Err(RttSkip::AckedPcountZero);
        }
        if !seg.first_acked {
            // Later segments of a batch would measure the batch, not the path.
            self.stats.skbs_not_first_ack.incr();
            return Err(RttSkip::NotFirstAck);
        }
        if seg.sacked_flags().intersects(SackedFlags::RETRANS) {
            self.stats.skbs_retransmitted.incr();
            return Err(RttSkip::Retransmitted);
        }

        let (seq, end_seq) = seg.acked_range(sk);
        let mss = sk.mss_cache();
        let packet_num = segment_offset(self.established_snd_una, seq, mss).unwrap_or(0);

        let tx_bytes_in_flight = layout
            .tx_in_flight(seg)
            .wrapping_sub(seg.end_seq.wrapping_sub(seg.seq));
        let tx_packets_in_flight = tx_bytes_in_flight.checked_div(mss).unwrap_or(0);
        let tcp_packets_in_flight = seg.packets_in_flight;

        // Samples taken while either estimate says the pipe is nearly empty
        // are always exported.
        if tx_packets_in_flight >= 2 && tcp_packets_in_flight >= 2 && packet_num > export_cutoff {
            self.stats.unexported_packets.incr();
            return Err(RttSkip::PastExportCutoff);
        }

        let xmit_timestamp_us = layout.skb_timestamp_us(seg);
        let now_timestamp_us = sk.tcp_mstamp_us();
        Ok(RttSample {
            seq,
            end_seq,
            packet_num,
            xmit_timestamp_us,
            now_timestamp_us,
            rtt_us: stamp_delta_us(now_timestamp_us, xmit_timestamp_us),
            tcp_packets_in_flight,
            tx_bytes_in_flight,
            tx_packets_in_flight,
            pcount: seg.acked_pcount,
            tx_delivered: seg.tx_delivered,
            tx_delivered_mstamp: seg.tx_delivered_mstamp,
            tx_first_tx_mstamp: seg.tx_first_tx_mstamp,
            flags: seg.tcp_flags,
            fully_acked: seg.fully_acked,
            sacked: seg.sacked,
        })
    }
}

/// `t1 - t0`, clamped to zero when the clocks disagree.
fn stamp_delta_us(t1: u64, t0: u64) -> u32 {
    u32::try_from(t1.saturating_sub(t0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::snapshot::SockSnapshot;

    const MSS: u32 = 1000;

    fn sock() -> SockSnapshot {
        SockSnapshot {
            snd_una: 0,
            mss_cache: MSS,
            tcp_mstamp_us: 2_500,
            ..Default::default()
        }
    }

    fn segment(index: u32, first_acked: bool) -> AckedSegment {
        AckedSegment {
            seq: index * MSS,
            end_seq: (index + 1) * MSS,
            orig_seq: index * MSS,
            fully_acked: true,
            first_acked,
            acked_pcount: 1,
            skb_mstamp_ns: 1_000_000,
            tx_word: 4 * MSS,
            packets_in_flight: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_only_first_acked_is_sampled() {
        let sk = sock();
        let mut track = RttTrack::new(0);
        let batch = [segment(0, true), segment(1, false), segment(2, false)];
        let results: Vec<_> = batch
            .iter()
            .map(|seg| track.on_ack(HostLayout::Linux54, &sk, seg, DEFAULT_RTT_EXPORT_CUTOFF))
            .collect();

        let sample = results[0].unwrap();
        assert_eq!(sample.rtt_us, 1_500);
        assert_eq!(sample.xmit_timestamp_us, 1_000);
        assert_eq!(sample.tx_bytes_in_flight, 3 * MSS);
        assert_eq!(sample.tx_packets_in_flight, 3);
        assert_eq!(sample.tcp_packets_in_flight, 3);
        assert_eq!(results[1], Err(RttSkip::NotFirstAck));
        assert_eq!(results[2], Err(RttSkip::NotFirstAck));
        assert_eq!(track.stats.calls.get(), 3);
        assert_eq!(track.stats.skbs_not_first_ack.get(), 2);
    }

    #[test]
    fn test_skip_reasons() {
        let sk = sock();
        let mut track = RttTrack::new(0);

        let mut zero = segment(0, true);
        zero.acked_pcount = 0;
        assert_eq!(
            track.on_ack(HostLayout::Linux54, &sk, &zero, 72),
            Err(RttSkip::AckedPcountZero)
        );

        let mut retrans = segment(1, true);
        retrans.sacked = SackedFlags::EVER_RETRANS.bits();
        assert_eq!(
            track.on_ack(HostLayout::Linux54, &sk, &retrans, 72),
            Err(RttSkip::Retransmitted)
        );

        assert_eq!(track.stats.skbs_with_acked_pcount_zero.get(), 1);
        assert_eq!(track.stats.skbs_retransmitted.get(), 1);
    }

    #[test]
    fn test_export_cutoff_needs_both_estimates() {
        let sk = sock();
        let mut track = RttTrack::new(0);

        let late = segment(100, true);
        assert_eq!(
            track.on_ack(HostLayout::Linux54, &sk, &late, 72),
            Err(RttSkip::PastExportCutoff)
        );
        assert_eq!(track.stats.unexported_packets.get(), 1);

        let mut draining = segment(101, true);
        draining.packets_in_flight = 1;
        let sample = track.on_ack(HostLayout::Linux54, &sk, &draining, 72).unwrap();
        assert_eq!(sample.packet_num, 101);
    }

    #[test]
    fn test_clock_skew_clamps_rtt() {
        let mut sk = sock();
        sk.tcp_mstamp_us = 500;
        let mut track = RttTrack::new(0);
        let sample = track
            .on_ack(HostLayout::Linux54, &sk, &segment(0, true), 72)
            .unwrap();
        assert_eq!(sample.rtt_us, 0);
    }
}
