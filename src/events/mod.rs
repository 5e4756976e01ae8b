//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Asynchronous notifications raised by the ticket engine.
//
// | Component                | Description                                                |
// |--------------------------|------------------------------------------------------------|
// | TicketEvent              | Enum of every notification the engine raises               |
// | EventBus                 | Broadcast hub for publishing and subscribing to events     |
// | EventHandler             | Trait for components that can handle events                |
// | EventDispatcher          | Routes events to registered handlers                       |
//--------------------------------------------------------------------------------------------------

mod dispatcher;
mod event_bus;
mod event_types;
mod handlers;

pub use dispatcher::EventDispatcher;
pub use event_bus::EventBus;
pub use event_types::{EventError, EventResult, TicketEvent};
pub use handlers::{EventHandler, EventLogger, TracingEventHandler};
