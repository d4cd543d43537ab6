//! Collector lifecycle.
//!
//! The collector owns the consumer side of the ring. [`Collector::attach`]
//! creates the ring and the probe dispatcher that feeds it; the host event
//! source drives the dispatcher while [`Collector::run`] drains the ring into
//! a handler on the calling thread until [`Collector::stop`] is observed or
//! every producer is gone.
//!
//! Stop is cooperative: the flag is checked once per poll, so the loop exits
//! at most one poll timeout after it is cleared.

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::configuration::config::Config;
use crate::error_handling::types::{ChannelError, CollectorError};
use crate::events::handler::EventHandler;
use crate::events::record::Event;
use crate::events::ring::{ring_channel, RingConsumer};
use crate::probes::ProbeDispatcher;

/// Records seen by the consumer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorTotals {
    pub handled: u64,
    pub lost: u64,
    pub polls: u64,
}

/// Forwards to the user handler while keeping the totals.
struct Tally<'a, H: ?Sized> {
    inner: &'a mut H,
    totals: &'a mut CollectorTotals,
}

impl<H: EventHandler + ?Sized> EventHandler for Tally<'_, H> {
    fn handle_event(&mut self, event: &Event) {
        self.totals.handled += 1;
        self.inner.handle_event(event);
    }

    fn handle_lost_events(&mut self, count: u64) {
        self.totals.lost += count;
        self.inner.handle_lost_events(count);
    }
}

pub struct Collector {
    config: Config,
    run_id: Uuid,
    running: Arc<AtomicBool>,
    attached: bool,
    started_at: Option<DateTime<Utc>>,
    totals: CollectorTotals,
}

impl Collector {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            run_id: Uuid::new_v4(),
            running: Arc::new(AtomicBool::new(false)),
            attached: false,
            started_at: None,
            totals: CollectorTotals::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Creates the ring and the dispatcher that produces into it.
    ///
    /// Fails if the ring cannot hold a record or the configuration does not
    /// describe a valid probe setup. Only one attach per collector.
    pub fn attach(&mut self) -> Result<(Arc<ProbeDispatcher>, RingConsumer), CollectorError> {
        if self.attached {
            return Err(CollectorError::AlreadyRunning);
        }
        let (emitter, consumer) =
            ring_channel(self.config.ring_pages, self.config.poll_timeout())?;
        let settings = self.config.probe_settings()?;
        let dispatcher = Arc::new(ProbeDispatcher::new(settings, emitter));

        self.attached = true;
        self.running.store(true, Ordering::SeqCst);
        self.started_at = Some(Utc::now());
        info!(
            "[{}] Attached {} probes, sampling threshold {}, ring of {} records",
            self.run_id,
            settings.variant,
            settings.gate.threshold(),
            consumer.capacity()
        );
        Ok((dispatcher, consumer))
    }

    /// Drains `consumer` into `handler` until stopped or disconnected.
    pub fn run<H: EventHandler + ?Sized>(
        &mut self,
        consumer: &mut RingConsumer,
        handler: &mut H,
    ) -> CollectorTotals {
        info!("[{}] Collector running", self.run_id);
        while self.is_running() {
            let mut tally = Tally {
                inner: &mut *handler,
                totals: &mut self.totals,
            };
            let polled = consumer.poll(&mut tally);
            self.totals.polls += 1;
            match polled {
                Ok(n) => {
                    if n > 0 {
                        debug!("[{}] Handled {} records", self.run_id, n);
                    }
                }
                Err(ChannelError::Disconnected) => {
                    info!("[{}] Every producer detached", self.run_id);
                    break;
                }
                Err(e) => {
                    error!("[{}] Consumer failed: {}", self.run_id, e);
                    break;
                }
            }
        }
        self.stop();
        self.log_totals();
        self.totals
    }

    /// Asks the consumer loop and the producers to stop.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("[{}] Stopping collector", self.run_id);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared run flag, for stopping from another task.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn totals(&self) -> CollectorTotals {
        self.totals
    }

    fn log_totals(&self) {
        let elapsed = self
            .started_at
            .map(|t| (Utc::now() - t).num_milliseconds())
            .unwrap_or(0);
        info!(
            "[{}] Collector stopped after {} ms: {} records handled, {} lost, {} polls",
            self.run_id, elapsed, self.totals.handled, self.totals.lost, self.totals.polls
        );
    }
}
