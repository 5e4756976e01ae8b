//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                   | Key Methods                   |
// |---------------|-----------------------------------------------|-------------------------------|
// | EventBus      | Fan-out of ticket events to all subscribers   | publish, subscribe            |
//--------------------------------------------------------------------------------------------------

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::event_types::{EventError, EventResult, TicketEvent};

/// Central fan-out of `TicketEvent`s built on tokio's broadcast channel.
///
/// Every subscriber receives every event published after it subscribed. Slow
/// subscribers that fall more than `capacity` events behind lose the oldest ones.
#[derive(Debug, Clone)]
pub struct EventBus {
    /// Channel for broadcasting events to all subscribers
    sender: broadcast::Sender<TicketEvent>,
    /// Capacity of the event channel
    capacity: usize,
}

impl EventBus {
    /// Creates a new event bus with the specified capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        info!("Created new EventBus with capacity: {}", capacity);
        Self { sender, capacity }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Publishing without subscribers drops the event and succeeds.
    pub fn publish(&self, event: TicketEvent) -> EventResult<()> {
        if self.sender.receiver_count() == 0 {
            debug!("No subscribers for event: {}", event.event_type());
            return Ok(());
        }

        debug!("Publishing event: {}", event.event_type());
        match self.sender.send(event) {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Failed to publish event: {}", e);
                Err(EventError::PublishError(e.to_string()))
            }
        }
    }

    /// Creates a new, independent subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Returns the capacity of the event channel.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_failed(ticket_id: &str) -> TicketEvent {
        TicketEvent::SendFailed {
            ticket_id: ticket_id.to_string(),
            ticket_type: crate::domain::models::ticket::TicketType::Ticket,
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::default();
        let mut subscriber = event_bus.subscribe();

        event_bus.publish(send_failed("t-1")).unwrap();

        let received = subscriber.recv().await.unwrap();
        assert_eq!(received.event_type(), "SendFailed");
        assert_eq!(received.ticket_id(), Some("t-1"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let event_bus = EventBus::new(4);
        assert_eq!(event_bus.subscriber_count(), 0);
        assert!(event_bus.publish(send_failed("t-1")).is_ok());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(8);
        let mut sub1 = event_bus.subscribe();
        let mut sub2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(send_failed("t-2")).unwrap();

        assert_eq!(sub1.recv().await.unwrap().ticket_id(), Some("t-2"));
        assert_eq!(sub2.recv().await.unwrap().ticket_id(), Some("t-2"));
    }
}
