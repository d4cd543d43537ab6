//! Stack-mirrored statistics copied into records at snapshot time.

use serde::Serialize;

use crate::host::accessor::{HostLayout, SockFields};

/// Busy, rwnd-limited and sndbuf-limited chrono slots.
const CHRONO_BUSY: usize = 0;
const CHRONO_RWND_LIMITED: usize = 1;
const CHRONO_SNDBUF_LIMITED: usize = 2;

/// Connection-level mirror shared by the per-variant payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TcpMirror {
    pub delivered: u32,
    pub lost: u32,
    pub total_retrans: u32,
    pub srtt_us: u32,
    pub mdev_us: u32,
    pub rttvar_us: u32,
    pub min_rtt_us: u32,
    pub snd_cwnd: u32,
    pub snd_una: u32,
    pub sacked_out: u32,
    pub mss_cache: u32,
    pub mstamp_us: u64,
    pub rto: u32,
}

impl TcpMirror {
    pub fn capture<S: SockFields + ?Sized>(sk: &S) -> Self {
        Self {
            delivered: sk.delivered(),
            lost: sk.lost(),
            total_retrans: sk.total_retrans(),
            srtt_us: sk.srtt_us_raw() >> 3,
            mdev_us: sk.mdev_us_raw() >> 2,
            rttvar_us: sk.rttvar_us_raw() >> 2,
            min_rtt_us: sk.min_rtt_us(),
            snd_cwnd: sk.snd_cwnd(),
            snd_una: sk.snd_una(),
            sacked_out: sk.sacked_out(),
            mss_cache: sk.mss_cache(),
            mstamp_us: sk.tcp_mstamp_us(),
            rto: sk.rto(),
        }
    }
}

/// Full statistics snapshot for the `tcp_stats` variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub srtt_us: u32,
    pub mdev_us: u32,
    pub rttvar_us: u32,
    pub min_rtt_us: u32,
    pub min_rtt_us_on_establish: u32,
    pub snd_ssthresh: u32,
    pub snd_cwnd: u32,
    pub segs_in: u32,
    pub segs_out: u32,
    pub data_segs_in: u32,
    pub data_segs_out: u32,
    pub total_retrans: u32,
    pub bytes_received: u64,
    pub bytes_acked: u64,
    pub bytes_retrans: u64,
    pub delivered: u32,
    pub delivered_ce: u32,
    pub first_tx_mstamp: u64,
    pub delivered_mstamp: u64,
    pub mss_cache: u32,
    pub lost: u32,
    pub chrono_busy_us: u64,
    pub chrono_rwnd_limited_us: u64,
    pub chrono_sndbuf_limited_us: u64,
    pub pacing_status: u32,
    pub pacing_rate: u64,
    pub max_pacing_rate: u64,
    pub sndbuf: i32,
    pub rcvbuf: i32,
    pub sk_shutdown: i32,
    pub sk_err: i32,
    pub sk_err_soft: i32,
    pub rto: u32,
    pub start_us: u64,
    /// Bytes acknowledged per millisecond of connection lifetime.
    pub throughput: u64,
}

impl StatsSnapshot {
    /// Reads every mirrored field. `start_us` and `min_rtt_on_establish` come
    /// from the session, `now_us` is the snapshot time.
    pub fn capture<S: SockFields + ?Sized>(
        layout: HostLayout,
        sk: &S,
        start_us: u64,
        min_rtt_on_establish: u32,
        now_us: u64,
    ) -> Self {
        let c = sk.counters();
        Self {
            srtt_us: sk.srtt_us_raw() >> 3,
            mdev_us: sk.mdev_us_raw() >> 2,
            rttvar_us: sk.rttvar_us_raw() >> 2,
            min_rtt_us: sk.min_rtt_us(),
            min_rtt_us_on_establish: min_rtt_on_establish,
            snd_ssthresh: sk.snd_ssthresh(),
            snd_cwnd: sk.snd_cwnd(),
            segs_in: c.segs_in,
            segs_out: c.segs_out,
            data_segs_in: c.data_segs_in,
            data_segs_out: c.data_segs_out,
            total_retrans: sk.total_retrans(),
            bytes_received: c.bytes_received,
            bytes_acked: c.bytes_acked,
            bytes_retrans: c.bytes_retrans,
            delivered: sk.delivered(),
            delivered_ce: c.delivered_ce,
            first_tx_mstamp: c.first_tx_mstamp,
            delivered_mstamp: c.delivered_mstamp,
            mss_cache: sk.mss_cache(),
            lost: sk.lost(),
            chrono_busy_us: layout.jiffies_to_us(c.chrono_stat[CHRONO_BUSY]),
            chrono_rwnd_limited_us: layout.jiffies_to_us(c.chrono_stat[CHRONO_RWND_LIMITED]),
            chrono_sndbuf_limited_us: layout.jiffies_to_us(c.chrono_stat[CHRONO_SNDBUF_LIMITED]),
            pacing_status: c.pacing_status,
            pacing_rate: c.pacing_rate,
            max_pacing_rate: c.max_pacing_rate,
            sndbuf: c.sndbuf,
            rcvbuf: c.rcvbuf,
            sk_shutdown: c.sk_shutdown,
            sk_err: c.sk_err,
            sk_err_soft: c.sk_err_soft,
            rto: sk.rto(),
            start_us,
            throughput: throughput(c.bytes_acked, start_us, now_us),
        }
    }
}

fn throughput(bytes_acked: u64, start_us: u64, now_us: u64) -> u64 {
    let duration = if now_us > start_us { now_us - start_us } else { 1 };
    bytes_acked.saturating_mul(1000) / duration
}
