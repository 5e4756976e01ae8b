use thiserror::Error;

use crate::domain::models::{response::ResponseType, ticket::TicketType};
use crate::transport::TransportError;

/// Errors returned by the ticket engine and its senders
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SdkError {
    /// The transport reported disconnected at send time; no pending state was created
    #[error("Transport unavailable, ticket {ticket_id} was not sent")]
    TransportUnavailable { ticket_id: String },

    /// The transport rejected the publish
    #[error("Publishing ticket {ticket_id} failed: {reason}")]
    PublishFailed { ticket_id: String, reason: String },

    /// No matching response arrived within the ticket type's window
    #[error("No response for ticket {ticket_id} within {timeout_ms} ms")]
    ResponseTimeout { ticket_id: String, timeout_ms: u64 },

    /// Inbound payload did not match its declared response shape
    #[error("Failed to deserialize {response_type}: {reason}")]
    DeserializationFailed {
        response_type: ResponseType,
        reason: String,
    },

    /// Another request with the same ticket id is still waiting for its response
    #[error("Ticket {0} already has a pending request")]
    DuplicateTicketId(String),

    #[error("No sender registered for {0}")]
    SenderNotRegistered(TicketType),

    /// The response resolving a blocking call was of another type than requested
    #[error("Expected {expected} for ticket {ticket_id}, received {received}")]
    UnexpectedResponse {
        ticket_id: String,
        expected: ResponseType,
        received: ResponseType,
    },

    #[error("{0} responses are not acknowledged")]
    AckNotSupported(ResponseType),

    /// Sends are refused until the engine has been opened
    #[error("Ticket engine is not open")]
    NotOpen,

    /// The engine was closed while the request was outstanding
    #[error("Ticket engine is closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Type alias for Result with SdkError
pub type SdkResult<T> = Result<T, SdkError>;
