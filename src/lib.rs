// Expose the modules
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod transport;

// Re-export key types for easier usage
pub use config::{ConfigError, SdkConfig};
pub use domain::models::response::{
    ResponseReason, ResponseType, SdkResponse, TicketAcceptance, TicketCancelResponse,
    TicketCancelStatus, TicketCashoutResponse, TicketNonSrSettleResponse, TicketResponse,
    UnparsableMessage,
};
pub use domain::models::ticket::{
    SdkTicket, Ticket, TicketAck, TicketCancel, TicketCancelAck, TicketCashout,
    TicketNonSrSettle, TicketType,
};
pub use domain::services::connection_status::{ConnectionStatus, ConnectionStatusSnapshot};
pub use domain::services::engine::{TicketEngine, TicketEngineBuilder};
pub use domain::services::ticket_sender::{TicketSender, TicketSenderFactory};
pub use error::{SdkError, SdkResult};
pub use events::{
    EventBus, EventDispatcher, EventError, EventHandler, EventLogger, EventResult, TicketEvent,
    TracingEventHandler,
};
pub use transport::{
    InboundHandler, InboundMessage, MessagePublisher, OutboundMessage, PublishFailure,
    TransportError,
};
