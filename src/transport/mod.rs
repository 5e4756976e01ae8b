//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Seams between the ticket engine and whatever carries its messages. The engine only
// needs to enqueue outbound bodies on a bound destination, learn about publishes that
// failed after the fact, and be called back for every inbound message.
//
// | Component          | Description                                                  |
// |--------------------|--------------------------------------------------------------|
// | MessagePublisher   | Outbound channel bound to one ticket type's destination      |
// | InboundHandler     | "Message received" callback invoked by response receivers    |
// | OutboundMessage    | Serialized ticket plus routing and correlation metadata      |
// | InboundMessage     | Raw response body plus routing key, type tag, correlation id |
// | PublishFailure     | Asynchronous report of a publish the transport could not do  |
// | amqp               | RabbitMQ-backed publishers and connection wiring             |
// | receiver           | ResponseReceiver: one consumer loop per response type        |
//--------------------------------------------------------------------------------------------------

pub mod amqp;
pub mod receiver;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::domain::models::{response::ResponseType, ticket::TicketType};

/// Errors raised by transport implementations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Channel is not open")]
    NotOpen,

    #[error("Publish rejected: {0}")]
    Publish(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Error while closing channel: {0}")]
    Close(String),
}

/// Serialized ticket ready to be published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub ticket_id: String,
    pub ticket_type: TicketType,
    pub correlation_id: String,
    /// Routing key for routed destinations; broadcast destinations ignore it
    pub routing_key: Option<String>,
    pub body: Vec<u8>,
}

/// Raw response as delivered by a response channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub response_type: ResponseType,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

/// Publish that failed after `publish` had already returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFailure {
    pub ticket_id: String,
    pub ticket_type: TicketType,
    pub correlation_id: Option<String>,
    pub reason: String,
}

/// Where publishers report asynchronous failures
pub type FailureSink = UnboundedSender<PublishFailure>;

/// Outbound channel bound to a single destination
///
/// `publish` must not block: it hands the message to the transport and returns.
/// Failures the transport only discovers later are sent to the sink given to `open`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Starts the channel; asynchronous failures go to `failures` from now on
    async fn open(&self, failures: FailureSink) -> Result<(), TransportError>;

    /// Enqueues a message for publishing
    fn publish(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Stops the channel
    async fn close(&self) -> Result<(), TransportError>;
}

/// "Message received" callback
pub trait InboundHandler: Send + Sync + 'static {
    fn on_message_received(&self, message: InboundMessage);
}
