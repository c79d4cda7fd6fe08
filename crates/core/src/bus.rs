use crate::events::{BusEvent, PipelineEvent};
use tokio::sync::broadcast;

/// Best-effort broadcast of pipeline events to all subscribers.
///
/// Built on a bounded broadcast channel: publishers never block, and a
/// subscriber that falls behind loses its oldest pending events. The gap is
/// surfaced to that subscriber as a single `droppedEvents` carrying the
/// count, with publish order otherwise preserved.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current subscribers. Events published with
    /// no subscribers are dropped silently.
    pub fn publish(&self, event: PipelineEvent) {
        tracing::trace!(?event, "publishing pipeline event");
        let _ = self.tx.send(BusEvent::now(event));
    }

    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's ordered view of the bus.
pub struct EventStream {
    rx: broadcast::Receiver<BusEvent>,
}

impl EventStream {
    /// Receives the next event. Returns `None` once the bus is closed and
    /// drained. A buffer overflow surfaces as `droppedEvents` in place of
    /// the lost events.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                tracing::warn!(count, "subscriber lagged; events dropped");
                Some(BusEvent::now(PipelineEvent::DroppedEvents { count }))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Stage;

    #[tokio::test]
    async fn subscriber_sees_events_in_publish_order() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe();

        for i in 0..5 {
            bus.publish(PipelineEvent::ScrapeLog {
                stage: Stage::Scraper,
                line: format!("line {i}"),
            });
        }

        for i in 0..5 {
            let event = stream.recv().await.unwrap();
            match event.event {
                PipelineEvent::ScrapeLog { line, .. } => assert_eq!(line, format!("line {i}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_gets_dropped_events_marker() {
        let bus = EventBus::new(4);
        let mut stream = bus.subscribe();

        // Overflow the 4-slot buffer without receiving.
        for i in 0..10 {
            bus.publish(PipelineEvent::ScrapeLog {
                stage: Stage::Scraper,
                line: format!("line {i}"),
            });
        }

        let first = stream.recv().await.unwrap();
        match first.event {
            PipelineEvent::DroppedEvents { count } => assert_eq!(count, 6),
            other => panic!("expected droppedEvents, got {other:?}"),
        }

        // The newest events are still delivered, in order.
        let next = stream.recv().await.unwrap();
        match next.event {
            PipelineEvent::ScrapeLog { line, .. } => assert_eq!(line, "line 6"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_block() {
        let bus = EventBus::new(2);
        for _ in 0..100 {
            bus.publish(PipelineEvent::CoinsUpdated { count: 0 });
        }
        assert_eq!(bus.subscriber_count(), 0);
    }
}
