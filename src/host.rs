//! Host-facing side of the probes.
//!
//! Everything that depends on how the host exposes socket state lives here:
//! the field accessor layer, the plain-data snapshot schema, decoded kernel
//! enums, and the trace replay source that drives the probes.

/// Submodule for the field accessor layer.
pub mod accessor;
/// Submodule for the trace replay host.
pub mod replay;
/// Submodule for the plain-data socket snapshot.
pub mod snapshot;
/// Submodule for decoded host enums and flags.
pub mod types;

pub use accessor::{AckedSegment, ConnectionId, HostLayout, SockCounters, SockFields};
pub use replay::{ReplaySummary, TraceEvent, TraceReplay};
pub use snapshot::SockSnapshot;
pub use types::{CaState, CcAlgo, SackedFlags, SockState};
