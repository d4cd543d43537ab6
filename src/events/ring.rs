//! Bounded ring between the probes and the consumer loop.
//!
//! Any number of [`EventEmitter`] clones feed one [`RingConsumer`]. Emitters
//! never wait: when the ring is full the record is dropped and a shared lost
//! counter goes up. The consumer blocks for at most its poll timeout, drains
//! what is queued, and reports losses since its previous poll.
//!
//! ```text
//!  probe ──┐
//!  probe ──┼─ try_send ─▶ [ bounded ring ] ─ recv_timeout ─▶ consumer ─▶ EventHandler
//!  probe ──┘      │                                             ▲
//!                 └──────────── lost counter ───────────────────┘
//! ```

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error_handling::types::ChannelError;

use super::handler::EventHandler;
use super::record::Event;
use super::wire::{WireRecord, RECORD_SIZE};

pub const PAGE_SIZE: usize = 4096;

/// Number of records that fit in `pages` pages.
pub fn ring_capacity(pages: usize) -> Result<usize, ChannelError> {
    if pages == 0 {
        return Err(ChannelError::ZeroCapacity);
    }
    Ok((pages.saturating_mul(PAGE_SIZE) / RECORD_SIZE).max(1))
}

/// Creates the ring sized in pages, with the consumer's poll timeout.
pub fn ring_channel(
    pages: usize,
    poll_timeout: Duration,
) -> Result<(EventEmitter, RingConsumer), ChannelError> {
    ring_channel_with_capacity(ring_capacity(pages)?, poll_timeout)
}

/// Creates the ring with an explicit record capacity.
pub fn ring_channel_with_capacity(
    capacity: usize,
    poll_timeout: Duration,
) -> Result<(EventEmitter, RingConsumer), ChannelError> {
    if capacity == 0 {
        return Err(ChannelError::ZeroCapacity);
    }
    let (tx, rx) = channel::bounded(capacity);
    let lost = Arc::new(AtomicU64::new(0));
    let emitter = EventEmitter {
        tx,
        lost: Arc::clone(&lost),
    };
    let consumer = RingConsumer {
        rx,
        lost,
        reported_lost: 0,
        capacity,
        poll_timeout,
    };
    Ok((emitter, consumer))
}

/// Producer side of the ring.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Sender<WireRecord>,
    lost: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Encodes `event` and queues it. Returns `false` if it was dropped.
    pub fn emit(&self, event: &Event) -> bool {
        let record = match WireRecord::encode(event) {
            Ok(record) => record,
            Err(e) => {
                debug!("Dropping {} record: {}", event.kind(), e);
                self.lost.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Ring full, dropping {} record", event.kind());
                self.lost.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("Ring consumer gone, dropping {} record", event.kind());
                self.lost.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Total records dropped so far.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }
}

/// Consumer side of the ring. Single-threaded by construction.
pub struct RingConsumer {
    rx: Receiver<WireRecord>,
    lost: Arc<AtomicU64>,
    reported_lost: u64,
    capacity: usize,
    poll_timeout: Duration,
}

impl RingConsumer {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Waits up to the poll timeout for a record, then drains at most one
    /// ring's worth more. Returns the number of records handed to `handler`,
    /// or `Disconnected` once every emitter is gone and the ring is empty.
    pub fn poll<H: EventHandler + ?Sized>(&mut self, handler: &mut H) -> Result<usize, ChannelError> {
        let mut handled = 0;
        let mut disconnected = false;

        match self.rx.recv_timeout(self.poll_timeout) {
            Ok(record) => {
                handled += Self::dispatch(&record, handler);
                for _ in 0..self.capacity {
                    match self.rx.try_recv() {
                        Ok(record) => handled += Self::dispatch(&record, handler),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            disconnected = true;
                            break;
                        }
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => disconnected = true,
        }

        let lost = self.lost.load(Ordering::Relaxed);
        if lost > self.reported_lost {
            handler.handle_lost_events(lost - self.reported_lost);
            self.reported_lost = lost;
        }

        if disconnected && handled == 0 {
            return Err(ChannelError::Disconnected);
        }
        Ok(handled)
    }

    fn dispatch<H: EventHandler + ?Sized>(record: &WireRecord, handler: &mut H) -> usize {
        match record.decode() {
            Ok(event) => {
                handler.handle_event(&event);
                1
            }
            Err(e) => {
                warn!("Discarding undecodable record: {}", e);
                0
            }
        }
    }
}
