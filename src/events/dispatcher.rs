//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods       |
// |-------------------------|---------------------------------------------------|------------------|
// | EventDispatcher         | Routes events to registered handlers              | dispatch, start   |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast::error::RecvError};
use tracing::{debug, error, info, warn};

use super::event_bus::EventBus;
use super::handlers::EventHandler;

/// Dispatches events from an `EventBus` to registered handlers
pub struct EventDispatcher {
    /// Event bus for receiving events
    event_bus: EventBus,
    /// Map of event types to handlers
    handlers: Arc<RwLock<HashMap<&'static str, Vec<Arc<dyn EventHandler>>>>>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("event_bus", &self.event_bus)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a handler for the event types it declares in `event_types()`.
    pub async fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;

        for event_type in handler.event_types() {
            handlers
                .entry(event_type)
                .or_insert_with(Vec::new)
                .push(Arc::clone(&handler));
        }

        debug!(
            "Registered handler for event types: {:?}",
            handler.event_types()
        );
    }

    /// Starts dispatching in the background.
    ///
    /// The subscription is taken before this returns, so every event published after
    /// `start` resolves reaches the handlers. The task ends when the bus is dropped.
    pub async fn start(self) -> tokio::task::JoinHandle<()> {
        let handlers = Arc::clone(&self.handlers);
        let mut receiver = self.event_bus.subscribe();

        tokio::spawn(async move {
            info!("Event dispatcher started");

            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event dispatcher lagged, skipped {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let event_type = event.event_type();
                let handlers_lock = handlers.read().await;
                match handlers_lock.get(event_type) {
                    Some(event_handlers) => {
                        for handler in event_handlers {
                            let handler = Arc::clone(handler);
                            let event_clone = event.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handler.handle_event(event_clone).await {
                                    error!("Handler failed to process event: {}", e);
                                }
                            });
                        }
                    }
                    None => debug!("No handlers registered for event type: {}", event_type),
                }
            }

            info!("Event dispatcher stopped");
        })
    }
}
