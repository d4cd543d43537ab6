//! Trace replay host.
//!
//! Reads a JSON-lines trace of stack events and feeds each one to the probe
//! dispatcher, the same calls the instrumentation subsystem makes on a live
//! host. One event per line:
//!
//! ```text
//! {"event": "established", "sk": {...}}
//! {"event": "skb_acked", "sk": {...}, "seg": {...}}
//! {"event": "set_ca_state", "sk": {...}, "new_state": 3}
//! {"event": "destroyed", "sk": {...}}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Malformed lines are
//! skipped with a warning.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error_handling::types::HostError;
use crate::probes::ProbeDispatcher;

use super::accessor::AckedSegment;
use super::snapshot::SockSnapshot;

/// One stack event as recorded in a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Established { sk: SockSnapshot },
    Destroyed { sk: SockSnapshot },
    SkbAcked { sk: SockSnapshot, seg: AckedSegment },
    SetCaState { sk: SockSnapshot, new_state: u8 },
}

impl TraceEvent {
    pub fn dispatch(&self, dispatcher: &ProbeDispatcher) {
        match self {
            TraceEvent::Established { sk } => dispatcher.on_established(sk),
            TraceEvent::Destroyed { sk } => dispatcher.on_destroy(sk),
            TraceEvent::SkbAcked { sk, seg } => {
                if dispatcher.settings().variant.uses_acks() {
                    dispatcher.on_skb_acked(sk, seg)
                }
            }
            TraceEvent::SetCaState { sk, new_state } => {
                if dispatcher.settings().variant.uses_ca_state() {
                    dispatcher.on_set_ca_state(sk, *new_state)
                }
            }
        }
    }
}

/// Counts from one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub lines: u64,
    pub dispatched: u64,
    pub malformed: u64,
}

/// A trace source, opened from a file or from stdin (`-`).
pub struct TraceReplay {
    source: String,
    reader: Box<dyn BufRead + Send>,
}

impl TraceReplay {
    pub fn open(path: &Path) -> Result<Self, HostError> {
        if path == Path::new("-") {
            return Ok(Self::from_reader("stdin", BufReader::new(io::stdin())));
        }
        let file = File::open(path).map_err(|e| {
            HostError::AttachFailed(format!("cannot open trace {}: {}", path.display(), e))
        })?;
        Ok(Self::from_reader(
            path.display().to_string(),
            BufReader::new(file),
        ))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(source: impl Into<String>, reader: R) -> Self {
        Self {
            source: source.into(),
            reader: Box::new(reader),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Feeds every event to `dispatcher` until the trace ends or `running`
    /// goes false.
    pub fn replay(
        mut self,
        dispatcher: &ProbeDispatcher,
        running: &AtomicBool,
    ) -> Result<ReplaySummary, HostError> {
        info!("Replaying stack events from {}", self.source);
        let mut summary = ReplaySummary::default();
        let mut line = String::new();

        while running.load(Ordering::Relaxed) {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                break;
            }
            summary.lines += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match serde_json::from_str::<TraceEvent>(trimmed) {
                Ok(event) => {
                    event.dispatch(dispatcher);
                    summary.dispatched += 1;
                }
                Err(e) => {
                    warn!("{}:{}: skipping malformed event: {}", self.source, summary.lines, e);
                    summary.malformed += 1;
                }
            }
        }

        debug!(
            "Replay of {} finished: {} lines, {} events, {} malformed",
            self.source, summary.lines, summary.dispatched, summary.malformed
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for TraceReplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceReplay")
            .field("source", &self.source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handler::EventHandler;
    use crate::events::record::{Event, EventPayload};
    use crate::events::ring::ring_channel_with_capacity;
    use crate::probes::{ProbeSettings, ProbeVariant};
    use std::io::{Cursor, Write};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct Collect(Vec<Event>);

    impl EventHandler for Collect {
        fn handle_event(&mut self, event: &Event) {
            self.0.push(*event);
        }

        fn handle_lost_events(&mut self, _count: u64) {}
    }

    const TRACE: &str = r#"
# one connection, one acked segment
{"event": "established", "sk": {"id": 1, "src": "10.0.0.1:443", "dst": "10.0.0.2:5000", "snd_una": 100}}
{"event": "skb_acked", "sk": {"id": 1, "src": "10.0.0.1:443", "dst": "10.0.0.2:5000", "snd_una": 1548}, "seg": {"seq": 100, "end_seq": 1548, "fully_acked": true, "first_acked": true, "acked_pcount": 1}}
this is not json
{"event": "destroyed", "sk": {"id": 1, "src": "10.0.0.1:443", "dst": "10.0.0.2:5000", "snd_una": 1548}}
"#;

    #[test]
    fn test_replay_drives_dispatcher() {
        let (emitter, mut consumer) =
            ring_channel_with_capacity(16, Duration::from_millis(5)).unwrap();
        let settings = ProbeSettings {
            variant: ProbeVariant::AckTrace,
            ..Default::default()
        };
        let dispatcher = ProbeDispatcher::new(settings, emitter);
        let running = AtomicBool::new(true);

        let replay = TraceReplay::from_reader("test", Cursor::new(TRACE.as_bytes().to_vec()));
        let summary = replay.replay(&dispatcher, &running).unwrap();
        assert_eq!(summary.dispatched, 3);
        assert_eq!(summary.malformed, 1);

        let mut handler = Collect::default();
        consumer.poll(&mut handler).unwrap();
        assert_eq!(handler.0.len(), 1);
        match handler.0[0].payload {
            EventPayload::AckTrace(p) => {
                assert_eq!(p.track.stats.calls.get(), 1);
                assert_eq!(p.track.end_seq, 1548);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_replay_stops_when_not_running() {
        let (emitter, _consumer) = ring_channel_with_capacity(4, Duration::from_millis(5)).unwrap();
        let dispatcher = ProbeDispatcher::new(ProbeSettings::default(), emitter);
        let running = AtomicBool::new(false);
        let replay = TraceReplay::from_reader("test", Cursor::new(TRACE.as_bytes().to_vec()));
        assert_eq!(replay.replay(&dispatcher, &running).unwrap().lines, 0);
    }

    #[test]
    fn test_open_missing_trace_fails_to_attach() {
        let err = TraceReplay::open(Path::new("/nonexistent/trace.jsonl")).unwrap_err();
        assert!(matches!(err, HostError::AttachFailed(_)));
    }

    #[test]
    fn test_open_trace_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", r#"{"event": "destroyed", "sk": {"id": 9}}"#).unwrap();
        let replay = TraceReplay::open(file.path()).unwrap();
        assert_eq!(replay.source(), file.path().display().to_string());
    }
}
