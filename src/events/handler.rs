use super::record::Event;

/// Receives records drained by the ring consumer.
///
/// Both methods run on the consumer thread; a handler that blocks delays
/// draining and makes drops more likely.
pub trait EventHandler {
    fn handle_event(&mut self, event: &Event);

    /// Called once per poll with the number of records dropped since the
    /// previous report.
    fn handle_lost_events(&mut self, count: u64);
}

impl<H: EventHandler + ?Sized> EventHandler for Box<H> {
    fn handle_event(&mut self, event: &Event) {
        (**self).handle_event(event)
    }

    fn handle_lost_events(&mut self, count: u64) {
        (**self).handle_lost_events(count)
    }
}
