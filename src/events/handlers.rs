//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods       |
// |-------------------------|---------------------------------------------------|------------------|
// | EventHandler            | Trait for event handling                          | handle_event      |
// | EventLogger             | Bounded in-memory history of events               | get_history       |
// | TracingEventHandler     | Writes every event to the tracing log             | handle_event      |
//--------------------------------------------------------------------------------------------------

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::event_types::{EventResult, TicketEvent};

/// Event handler trait for processing events
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the types of events this handler processes
    fn event_types(&self) -> Vec<&'static str>;

    /// Processes an event
    async fn handle_event(&self, event: TicketEvent) -> EventResult<()>;
}

/// A simple in-memory event logger
pub struct EventLogger {
    /// Maximum number of events to keep in history
    max_history: usize,
    /// Event history
    history: Arc<RwLock<Vec<TicketEvent>>>,
}

impl EventLogger {
    /// Creates a new event logger
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            history: Arc::new(RwLock::new(Vec::with_capacity(max_history))),
        }
    }

    /// Returns the event history
    pub async fn get_history(&self) -> Vec<TicketEvent> {
        self.history.read().await.clone()
    }
}

#[async_trait::async_trait]
impl EventHandler for EventLogger {
    fn event_types(&self) -> Vec<&'static str> {
        TicketEvent::ALL_TYPES.to_vec()
    }

    async fn handle_event(&self, event: TicketEvent) -> EventResult<()> {
        let mut history = self.history.write().await;

        if history.len() >= self.max_history {
            history.remove(0);
        }
        history.push(event);

        Ok(())
    }
}

/// Logs ticket outcomes through `tracing`
pub struct TracingEventHandler;

#[async_trait::async_trait]
impl EventHandler for TracingEventHandler {
    fn event_types(&self) -> Vec<&'static str> {
        TicketEvent::ALL_TYPES.to_vec()
    }

    async fn handle_event(&self, event: TicketEvent) -> EventResult<()> {
        match &event {
            TicketEvent::ResponseReceived(response) => {
                info!(
                    "{} for ticket {} (reason {})",
                    response.response_type(),
                    response.ticket_id(),
                    response.reason().code
                );
            }
            TicketEvent::ResponseTimedOut {
                ticket_id,
                ticket_type,
                ..
            } => {
                warn!("{} {} timed out", ticket_type, ticket_id);
            }
            TicketEvent::SendFailed {
                ticket_id, reason, ..
            } => {
                warn!("sending {} failed: {}", ticket_id, reason);
            }
            TicketEvent::UnparsableMessageReceived(msg) => {
                warn!(
                    "unparsable {} on {}: {}",
                    msg.response_type, msg.routing_key, msg.error
                );
            }
            TicketEvent::ConnectionStatusChanged(status) => {
                info!("connection status changed: connected={}", status.is_connected);
            }
        }
        Ok(())
    }
}
