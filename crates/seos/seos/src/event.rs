//! Protocol milestones reported to the surrounding application

use std::sync::Arc;

use parking_lot::Mutex;

/// Milestones raised by the APDU and HCI engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// The SEOS applet (or the inspection selector) was selected
    AidSelected,
    /// A SELECT ADF matched a known object identifier
    AdfMatched,
    /// Mutual authentication succeeded
    Authenticated,
    /// An authenticated reader asked for the SIO
    SioRequested,
    /// The reader side read the SIO of a card
    CredentialCaptured,
    /// An unrecognized frame arrived, keep emulating
    Listening,
    /// The reader failed authentication or secure messaging
    ReaderError,
    /// The radio controller link came up
    HciInit,
    /// Advertising was enabled
    Advertising,
    /// Scanning was enabled
    Scanning,
    /// A peer advertising the expected service was found
    DeviceFound,
    /// A link was established
    Connected,
    /// A scanner saw a previously unknown device
    NewDevice([u8; 6]),
    /// The link was closed
    Disconnected,
}

/// Receiver of protocol milestones
pub trait EventSink {
    /// Deliver one event
    fn notify(&mut self, event: Event);
}

impl<F> EventSink for F
where
    F: FnMut(Event),
{
    fn notify(&mut self, event: Event) {
        self(event)
    }
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&mut self, _event: Event) {}
}

/// Sink that records every event, cloneable so a copy can be inspected later
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Drain the recorded events
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    /// How often `event` was recorded
    pub fn count(&self, event: Event) -> usize {
        self.events.lock().iter().filter(|&&e| e == event).count()
    }
}

impl EventSink for EventLog {
    fn notify(&mut self, event: Event) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |event: Event| seen.push(event);
            sink.notify(Event::AidSelected);
            sink.notify(Event::Authenticated);
        }
        assert_eq!(seen, vec![Event::AidSelected, Event::Authenticated]);
    }

    #[test]
    fn test_event_log_is_shared() {
        let log = EventLog::new();
        let mut sink = log.clone();
        sink.notify(Event::Listening);
        sink.notify(Event::Listening);
        sink.notify(Event::NewDevice([1, 2, 3, 4, 5, 6]));

        assert_eq!(log.count(Event::Listening), 2);
        assert_eq!(log.events().len(), 3);
        assert_eq!(log.take().len(), 3);
        assert!(log.events().is_empty());
    }
}
