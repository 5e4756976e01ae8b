//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// | Component          | Description                                                   |
// |--------------------|---------------------------------------------------------------|
// | ConnectionStatus   | Transport connectivity and last activity, consulted per send  |
// | TicketSender       | Publishes one ticket type and caches what it sent             |
// | PendingRequests    | Table of in-flight requests with deadlines and atomic claims  |
// | TicketEngine       | Send entry points, demultiplexing and timeout management      |
//--------------------------------------------------------------------------------------------------

pub mod connection_status;
pub mod correlation;
pub mod engine;
pub mod ticket_sender;
