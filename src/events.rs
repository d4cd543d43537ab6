//! Event records and their delivery path.
//!
//! Probes build an [`Event`](record::Event), the [`EventEmitter`](ring::EventEmitter)
//! encodes it into a fixed-size [`WireRecord`](wire::WireRecord) and pushes it
//! onto the ring, and the [`RingConsumer`](ring::RingConsumer) decodes it and
//! hands it to an [`EventHandler`](handler::EventHandler).

pub mod handler;
pub mod record;
pub mod ring;
pub mod wire;

pub use handler::EventHandler;
pub use record::{Event, EventHeader, EventKind, EventPayload};
pub use ring::{ring_channel, EventEmitter, RingConsumer};
pub use wire::{WireRecord, RECORD_SIZE};
