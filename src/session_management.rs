//! Session management core module.
//!
//! This module provides the per-connection session record, the bounded
//! table that stores live sessions, and the sampling gate that decides which
//! connections get a session at all.

/// Submodule for the sampling gate.
pub mod sampling;
/// Submodule for the session record.
pub mod session;
/// Submodule for the bounded session table.
pub mod session_table;

pub use sampling::SamplingGate;
pub use session::{Session, VariantState};
pub use session_table::{SessionTable, SESSION_TABLE_CAPACITY};
