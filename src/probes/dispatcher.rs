//! The probe dispatcher.
//!
//! One entry point per stack event. Each is safe to call concurrently from
//! any number of threads: per-connection exclusivity comes from the session
//! table, and nothing here blocks or fails. Whatever cannot be handled
//! (untracked connection, unknown session, full table, unsupported address
//! family) is dropped quietly and, where a counter exists, counted.
//!
//! ```text
//!  established ─▶ gate ─▶ table.create
//!  skb_acked   ─▶ table.lookup ─▶ AckTrack | RttTrack ──(sample)──▶ emitter
//!  set_ca_state─▶ table.lookup ─▶ LossTrack
//!  destroyed   ─▶ table.delete ─▶ terminal record ──────────────────▶ emitter
//! ```

use log::{debug, trace};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::attribution::ca_loss::DEFAULT_TRACKING_CUTOFF;
use crate::attribution::rtt_estimator::{RttSkip, DEFAULT_RTT_EXPORT_CUTOFF};
use crate::events::record::Event;
use crate::events::ring::EventEmitter;
use crate::host::accessor::{AckedSegment, HostLayout, SockFields};
use crate::host::types::CaState;
use crate::session_management::sampling::SamplingGate;
use crate::session_management::session::{Session, VariantState};
use crate::session_management::session_table::SessionTable;

use super::ProbeVariant;

/// Values the dispatcher needs from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSettings {
    pub variant: ProbeVariant,
    pub layout: HostLayout,
    pub gate: SamplingGate,
    pub tracking_cutoff: u32,
    pub rtt_export_cutoff: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            variant: ProbeVariant::default(),
            layout: HostLayout::default(),
            gate: SamplingGate::all(),
            tracking_cutoff: DEFAULT_TRACKING_CUTOFF,
            rtt_export_cutoff: DEFAULT_RTT_EXPORT_CUTOFF,
        }
    }
}

/// Snapshot of the dispatcher's drop and emit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sessions_created: u64,
    pub sampled_out: u64,
    pub table_full: u64,
    pub unsupported_family: u64,
    pub terminal_events: u64,
    pub sample_events: u64,
}

#[derive(Default)]
struct DispatchCounters {
    sessions_created: AtomicU64,
    sampled_out: AtomicU64,
    table_full: AtomicU64,
    unsupported_family: AtomicU64,
    terminal_events: AtomicU64,
    sample_events: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct ProbeDispatcher {
    settings: ProbeSettings,
    table: SessionTable,
    emitter: EventEmitter,
    counters: DispatchCounters,
}

impl ProbeDispatcher {
    pub fn new(settings: ProbeSettings, emitter: EventEmitter) -> Self {
        Self {
            settings,
            table: SessionTable::new(),
            emitter,
            counters: DispatchCounters::default(),
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.table
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            sessions_created: c.sessions_created.load(Ordering::Relaxed),
            sampled_out: c.sampled_out.load(Ordering::Relaxed),
            table_full: c.table_full.load(Ordering::Relaxed),
            unsupported_family: c.unsupported_family.load(Ordering::Relaxed),
            terminal_events: c.terminal_events.load(Ordering::Relaxed),
            sample_events: c.sample_events.load(Ordering::Relaxed),
        }
    }

    /// Connection reached the established state.
    pub fn on_established<S: SockFields + ?Sized>(&self, sk: &S) {
        let id = sk.conn_id();
        if !self.settings.gate.is_tracked(sk.sampling_tag()) {
            bump(&self.counters.sampled_out);
            return;
        }
        let Some((src, dst)) = self.settings.layout.endpoints(sk) else {
            trace!("[{}] unsupported address family {}", id, sk.family());
            bump(&self.counters.unsupported_family);
            return;
        };
        let session = Session::establish(self.settings.variant, sk, src, dst);
        if self.table.create(session) {
            trace!("[{}] session created {} -> {}", id, src, dst);
            bump(&self.counters.sessions_created);
        } else {
            debug!("[{}] session table full, connection not tracked", id);
            bump(&self.counters.table_full);
        }
    }

    /// Connection is being torn down. Emits the terminal record and removes
    /// the session whatever its attribution state.
    pub fn on_destroy<S: SockFields + ?Sized>(&self, sk: &S) {
        let Some(session) = self.table.delete(sk.conn_id()) else {
            return;
        };
        let event = Event::terminal(self.settings.layout, sk, &session);
        trace!("[{}] session destroyed, emitting {}", session.id, event.kind());
        if self.emitter.emit(&event) {
            bump(&self.counters.terminal_events);
        }
    }

    /// A segment was acknowledged.
    pub fn on_skb_acked<S: SockFields + ?Sized>(&self, sk: &S, seg: &AckedSegment) {
        let settings = &self.settings;
        let sample = self
            .table
            .lookup(sk.conn_id(), |session| match &mut session.state {
                VariantState::AckTrace(track) => {
                    track.on_ack(settings.layout, sk, seg);
                    None
                }
                VariantState::RttTrace(track) => {
                    match track.on_ack(settings.layout, sk, seg, settings.rtt_export_cutoff) {
                        Ok(sample) => {
                            let track = *track;
                            Some(Event::rtt_sample(sk, session, &track, sample))
                        }
                        Err(RttSkip::PastExportCutoff) => None,
                        Err(skip) => {
                            trace!("[{}] rtt sample skipped: {:?}", session.id, skip);
                            None
                        }
                    }
                }
                VariantState::CaLoss(_) | VariantState::TcpStats(_) => None,
            })
            .flatten();

        if let Some(event) = sample {
            if self.emitter.emit(&event) {
                bump(&self.counters.sample_events);
            }
        }
    }

    /// The stack is about to move the connection to CA state `new_state`.
    /// The socket still reports the old state.
    pub fn on_set_ca_state<S: SockFields + ?Sized>(&self, sk: &S, new_state: u8) {
        let settings = &self.settings;
        self.table.lookup(sk.conn_id(), |session| {
            if session.loss_track().is_none() {
                return;
            }
            let old = settings.layout.ca_state(sk);
            let new = CaState::try_from(new_state);
            if let Ok(new) = new {
                session.ca_changes.record(new);
            }
            let cc = session.resolve_cc_algo(sk);
            let id = session.id;
            let Some(lts) = session.loss_track_mut() else {
                return;
            };
            match (old, new) {
                (Ok(old), Ok(new)) => {
                    trace!("[{}] {} -> {}", id, old, new);
                    lts.on_transition(sk, cc, old, new, settings.tracking_cutoff);
                }
                (Err(e), _) | (_, Err(e)) => {
                    debug!("[{}] {}, loss attribution stopped", id, e);
                    lts.record_decode_failure();
                }
            }
        });
    }
}
