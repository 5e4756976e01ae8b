//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name                       | Description                                     | Key Methods         |
// |----------------------------|-------------------------------------------------|---------------------|
// | ConnectionStatus           | Shared connectivity state with change events    | connect, disconnect |
// | ConnectionStatusSnapshot   | Point-in-time copy carried by events            |                     |
//--------------------------------------------------------------------------------------------------

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::events::{EventBus, TicketEvent};

/// Copy of the connection state at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusSnapshot {
    pub is_connected: bool,
    pub connection_time: Option<DateTime<Utc>>,
    pub disconnection_time: Option<DateTime<Utc>>,
    /// Why the last disconnect happened, if it was reported
    pub reason: Option<String>,
    pub last_send_ticket_id: Option<String>,
    pub last_received_ticket_id: Option<String>,
}

/// Shared handle on the transport's connectivity
///
/// Clones share the same state. Read synchronously before every send; written by the
/// transport on connectivity changes and by the engine on every send and receipt.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    state: Arc<RwLock<ConnectionStatusSnapshot>>,
    event_bus: EventBus,
}

impl ConnectionStatus {
    /// Creates a disconnected status that announces transitions on `event_bus`
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(ConnectionStatusSnapshot::default())),
            event_bus,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Marks the transport connected; a no-op when already connected
    pub fn connect(&self) {
        let snapshot = {
            let mut state = self.state.write();
            if state.is_connected {
                return;
            }
            state.is_connected = true;
            state.connection_time = Some(Utc::now());
            state.reason = None;
            state.clone()
        };

        info!("Connection status: connected");
        self.announce(snapshot);
    }

    /// Marks the transport disconnected; a no-op when already disconnected
    ///
    /// Pending requests are not touched, they resolve through their own timeouts.
    pub fn disconnect(&self, reason: &str) {
        let snapshot = {
            let mut state = self.state.write();
            if !state.is_connected {
                return;
            }
            state.is_connected = false;
            state.disconnection_time = Some(Utc::now());
            state.reason = Some(reason.to_owned());
            state.clone()
        };

        warn!("Connection status: disconnected ({})", reason);
        self.announce(snapshot);
    }

    pub fn connection_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().connection_time
    }

    pub fn disconnection_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().disconnection_time
    }

    pub fn last_send_ticket_id(&self) -> Option<String> {
        self.state.read().last_send_ticket_id.clone()
    }

    pub fn last_received_ticket_id(&self) -> Option<String> {
        self.state.read().last_received_ticket_id.clone()
    }

    pub fn snapshot(&self) -> ConnectionStatusSnapshot {
        self.state.read().clone()
    }

    pub fn on_ticket_sent(&self, ticket_id: &str) {
        self.state.write().last_send_ticket_id = Some(ticket_id.to_owned());
    }

    pub fn on_ticket_received(&self, ticket_id: &str) {
        self.state.write().last_received_ticket_id = Some(ticket_id.to_owned());
    }

    // Called after the lock is released so subscribers never observe it held
    fn announce(&self, snapshot: ConnectionStatusSnapshot) {
        let _ = self
            .event_bus
            .publish(TicketEvent::ConnectionStatusChanged(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_disconnected() {
        let status = ConnectionStatus::new(EventBus::new(8));
        assert!(!status.is_connected());
        assert!(status.connection_time().is_none());
        assert!(status.disconnection_time().is_none());
    }

    #[tokio::test]
    async fn test_only_transitions_emit_events() {
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let status = ConnectionStatus::new(bus);

        status.connect();
        status.connect();
        status.disconnect("broker closed");
        status.disconnect("broker closed");

        match events.recv().await.unwrap() {
            TicketEvent::ConnectionStatusChanged(s) => assert!(s.is_connected),
            other => panic!("unexpected event {:?}", other),
        }
        match events.recv().await.unwrap() {
            TicketEvent::ConnectionStatusChanged(s) => {
                assert!(!s.is_connected);
                assert_eq!(s.reason.as_deref(), Some("broker closed"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_tracks_last_activity() {
        let status = ConnectionStatus::new(EventBus::new(8));
        status.on_ticket_sent("t-1");
        status.on_ticket_received("t-0");

        let clone = status.clone();
        assert_eq!(clone.last_send_ticket_id().as_deref(), Some("t-1"));
        assert_eq!(clone.last_received_ticket_id().as_deref(), Some("t-0"));
    }
}
