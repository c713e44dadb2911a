//! Broadcast event bus for printer events.
//!
//! Publishing never blocks and never fails the caller: with no subscribers
//! the event is dropped. Slow subscribers may lose old events.

use tokio::sync::broadcast;

use crate::event::{EventMetadata, PrinterEvent};

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Event bus carrying [`PrinterEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(PrinterEvent, EventMetadata)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// The capacity is how many events are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish with the given source. Returns `true` if anyone was listening.
    pub fn publish(&self, event: PrinterEvent, source: &str) -> bool {
        self.publish_with_metadata(event, EventMetadata::new(source))
    }

    pub fn publish_with_metadata(&self, event: PrinterEvent, metadata: EventMetadata) -> bool {
        self.tx.send((event, metadata)).is_ok()
    }

    /// Publish a batch in order.
    pub fn publish_all(&self, events: impl IntoIterator<Item = PrinterEvent>, source: &str) {
        for event in events {
            self.publish(event, source);
        }
    }

    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching `filter`.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&PrinterEvent) -> bool + Send + 'static,
    {
        FilteredReceiver {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// Only alert transitions for one printer.
    pub fn subscribe_alerts(
        &self,
        device_id: impl Into<String>,
    ) -> FilteredReceiver<impl Fn(&PrinterEvent) -> bool + Send + 'static> {
        let device_id = device_id.into();
        self.subscribe_filtered(move |e| e.is_alert_event() && e.device_id() == device_id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(PrinterEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<(PrinterEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<(PrinterEvent, EventMetadata)> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Receiver that only yields events accepted by a filter.
pub struct FilteredReceiver<F>
where
    F: Fn(&PrinterEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(PrinterEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&PrinterEvent) -> bool + Send,
{
    pub async fn recv(&mut self) -> Option<(PrinterEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<(PrinterEvent, EventMetadata)> {
        loop {
            match self.rx.try_recv() {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
