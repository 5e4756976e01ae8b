//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods       |
// |-------------------------|---------------------------------------------------|------------------|
// | TicketEvent             | Notifications raised by the ticket engine         | event_type       |
// | EventError              | Error types for event processing                  |                  |
//--------------------------------------------------------------------------------------------------

use serde::Serialize;
use thiserror::Error;

use crate::domain::models::{
    response::{SdkResponse, UnparsableMessage},
    ticket::TicketType,
};
use crate::domain::services::connection_status::ConnectionStatusSnapshot;

/// Errors that can occur in the event system
#[derive(Error, Debug, Clone)]
pub enum EventError {
    /// Failed to publish an event
    #[error("Failed to publish event: {0}")]
    PublishError(String),

    /// A handler failed to process an event
    #[error("Failed to process event: {0}")]
    ProcessingError(String),
}

/// Type alias for Result with EventError
pub type EventResult<T> = Result<T, EventError>;

/// Notifications raised by the ticket engine for asynchronous subscribers
///
/// For a non-blocking send exactly one of `ResponseReceived`, `ResponseTimedOut` or
/// `SendFailed` is raised per ticket id. Blocking sends raise none of them.
#[derive(Debug, Clone, Serialize)]
pub enum TicketEvent {
    /// A response matched a pending non-blocking request
    ResponseReceived(SdkResponse),

    /// No response arrived before the ticket type's deadline
    ResponseTimedOut {
        ticket_id: String,
        ticket_type: TicketType,
        correlation_id: String,
    },

    /// The transport could not publish the ticket
    SendFailed {
        ticket_id: String,
        ticket_type: TicketType,
        reason: String,
    },

    /// An inbound body could not be parsed; never matched against pending requests
    UnparsableMessageReceived(UnparsableMessage),

    /// Transport connectivity changed
    ConnectionStatusChanged(ConnectionStatusSnapshot),
}

impl TicketEvent {
    pub const ALL_TYPES: [&'static str; 5] = [
        "ResponseReceived",
        "ResponseTimedOut",
        "SendFailed",
        "UnparsableMessageReceived",
        "ConnectionStatusChanged",
    ];

    /// Stable name used to route events to handlers
    pub fn event_type(&self) -> &'static str {
        match self {
            TicketEvent::ResponseReceived(_) => "ResponseReceived",
            TicketEvent::ResponseTimedOut { .. } => "ResponseTimedOut",
            TicketEvent::SendFailed { .. } => "SendFailed",
            TicketEvent::UnparsableMessageReceived(_) => "UnparsableMessageReceived",
            TicketEvent::ConnectionStatusChanged(_) => "ConnectionStatusChanged",
        }
    }

    /// Ticket the event refers to, if any
    pub fn ticket_id(&self) -> Option<&str> {
        match self {
            TicketEvent::ResponseReceived(response) => Some(response.ticket_id()),
            TicketEvent::ResponseTimedOut { ticket_id, .. } => Some(ticket_id),
            TicketEvent::SendFailed { ticket_id, .. } => Some(ticket_id),
            TicketEvent::UnparsableMessageReceived(msg) => msg.ticket_id.as_deref(),
            TicketEvent::ConnectionStatusChanged(_) => None,
        }
    }
}
