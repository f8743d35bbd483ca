use tokio::sync::broadcast;

use crate::Event;

/// Fan-out channel for cache and transport notifications.
///
/// One bus is shared by every component: each holds a clone and publishes
/// into the same underlying channel, so a single subscription observes the
/// whole system. Publishing is synchronous and never blocks; a subscriber
/// that falls more than `capacity` events behind loses the oldest ones and
/// is told how many via `RecvError::Lagged`.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. With no live subscribers the event is dropped.
    ///
    /// Takes anything `Into<Event>`, so sub-enum values pass through
    /// directly: `bus.publish(NetEvent::StallDetected)`.
    pub fn publish<E: Into<Event>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    /// Open an independent receiver for all events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    use super::*;
    use crate::NetEvent;

    #[tokio::test]
    async fn every_open_receiver_sees_a_publish() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        // Clones publish into the same channel.
        bus.clone().publish(NetEvent::FlightResized { flight_size: 7 });

        for rx in [&mut a, &mut b] {
            assert!(matches!(
                rx.recv().await.unwrap(),
                Event::Net(NetEvent::FlightResized { flight_size: 7 })
            ));
        }
    }

    #[test]
    fn subscription_starts_at_the_present() {
        let bus = EventBus::new(8);
        bus.publish(NetEvent::StallDetected);
        let mut late = bus.subscribe();
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn publish_with_no_receivers_is_a_no_op() {
        let bus = EventBus::new(8);
        bus.publish(NetEvent::StallDetected);
    }

    #[tokio::test]
    async fn overrun_receiver_reports_how_much_it_missed() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..10 {
            bus.publish(NetEvent::FlightResized { flight_size: i });
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(8))));
        // The two newest events are still deliverable.
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::Net(NetEvent::FlightResized { flight_size: 8 })
        ));
    }
}
