//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name              | Description                                            | Key Methods       |
// |-------------------|--------------------------------------------------------|-------------------|
// | InboundSource     | Anything that yields raw deliveries for one channel    | receive, close    |
// | RawDelivery       | Routing key, correlation id and body of one delivery   |                   |
// | ResponseReceiver  | Consumer loop tagging deliveries with a response type  | start, close      |
//--------------------------------------------------------------------------------------------------

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rabbitmq::Subscription;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::models::response::ResponseType;

use super::{InboundHandler, InboundMessage, TransportError};

/// One delivery as taken off an inbound channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDelivery {
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

/// Source of deliveries for a single response channel
#[async_trait]
pub trait InboundSource: Send + 'static {
    /// Next delivery, or None once the channel is gone
    async fn receive(&mut self) -> Option<RawDelivery>;

    async fn close(self: Box<Self>) -> Result<(), TransportError>;
}

#[async_trait]
impl InboundSource for Subscription {
    async fn receive(&mut self) -> Option<RawDelivery> {
        let delivery = Subscription::receive(self).await?;
        Some(RawDelivery {
            routing_key: delivery.routing_key,
            correlation_id: delivery.correlation_id,
            body: delivery.content,
        })
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        Subscription::close(*self)
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}

type ConsumerTask = JoinHandle<Box<dyn InboundSource>>;

/// Consumes one response channel and hands every delivery to an `InboundHandler`
///
/// Deliveries are processed one at a time, in arrival order. The handler runs on the
/// consumer task, so it must not block.
pub struct ResponseReceiver {
    response_type: ResponseType,
    source: Mutex<Option<Box<dyn InboundSource>>>,
    task: Mutex<Option<ConsumerTask>>,
    shutdown: CancellationToken,
}

impl ResponseReceiver {
    pub fn new(response_type: ResponseType, source: Box<dyn InboundSource>) -> Self {
        Self {
            response_type,
            source: Mutex::new(Some(source)),
            task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// Starts consuming; deliveries go to `handler`
    ///
    /// # Errors
    /// `TransportError::NotOpen` if the receiver was already started or closed
    pub fn start(&self, handler: Arc<dyn InboundHandler>) -> Result<(), TransportError> {
        let mut source = self.source.lock().take().ok_or(TransportError::NotOpen)?;
        let response_type = self.response_type;
        let shutdown = self.shutdown.clone();

        let task = tokio::spawn(async move {
            info!("{} receiver started", response_type);
            loop {
                let delivery = select! {
                    _ = shutdown.cancelled() => break,
                    delivery = source.receive() => delivery,
                };
                let Some(delivery) = delivery else {
                    debug!("{} channel closed", response_type);
                    break;
                };

                debug!(
                    "{} delivery on {} (correlation {:?})",
                    response_type, delivery.routing_key, delivery.correlation_id
                );
                handler.on_message_received(InboundMessage {
                    response_type,
                    routing_key: delivery.routing_key,
                    correlation_id: delivery.correlation_id,
                    body: delivery.body,
                });
            }
            info!("{} receiver stopped", response_type);
            source
        });

        *self.task.lock() = Some(task);
        Ok(())
    }

    /// Stops the consumer loop and closes the channel
    pub async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();

        let task = self.task.lock().take();
        let source = match task {
            Some(task) => match task.await {
                Ok(source) => Some(source),
                Err(e) => {
                    error!("{} receiver task failed: {}", self.response_type, e);
                    None
                }
            },
            None => self.source.lock().take(),
        };

        match source {
            Some(source) => source.close().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct ChannelSource(mpsc::UnboundedReceiver<RawDelivery>);

    #[async_trait]
    impl InboundSource for ChannelSource {
        async fn receive(&mut self) -> Option<RawDelivery> {
            self.0.recv().await
        }

        async fn close(self: Box<Self>) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct Collector(mpsc::UnboundedSender<InboundMessage>);

    impl InboundHandler for Collector {
        fn on_message_received(&self, message: InboundMessage) {
            let _ = self.0.send(message);
        }
    }

    fn delivery(body: &str) -> RawDelivery {
        RawDelivery {
            routing_key: "node1.cancel.confirm".to_string(),
            correlation_id: Some("corr-1".to_string()),
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_deliveries_are_tagged_and_ordered() {
        let (source_tx, source_rx) = mpsc::unbounded_channel();
        let (handler_tx, mut handler_rx) = mpsc::unbounded_channel();

        let receiver =
            ResponseReceiver::new(ResponseType::TicketCancel, Box::new(ChannelSource(source_rx)));
        receiver.start(Arc::new(Collector(handler_tx))).unwrap();

        source_tx.send(delivery("first")).unwrap();
        source_tx.send(delivery("second")).unwrap();

        let first = handler_rx.recv().await.unwrap();
        assert_eq!(first.response_type, ResponseType::TicketCancel);
        assert_eq!(first.routing_key, "node1.cancel.confirm");
        assert_eq!(first.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(first.body, b"first");
        assert_eq!(handler_rx.recv().await.unwrap().body, b"second");

        receiver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_source_tx, source_rx) = mpsc::unbounded_channel();
        let (handler_tx, _handler_rx) = mpsc::unbounded_channel();
        let handler: Arc<dyn InboundHandler> = Arc::new(Collector(handler_tx));

        let receiver =
            ResponseReceiver::new(ResponseType::Ticket, Box::new(ChannelSource(source_rx)));
        receiver.start(Arc::clone(&handler)).unwrap();

        assert_eq!(receiver.start(handler), Err(TransportError::NotOpen));
        receiver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_start() {
        let (_source_tx, source_rx) = mpsc::unbounded_channel();
        let receiver =
            ResponseReceiver::new(ResponseType::Ticket, Box::new(ChannelSource(source_rx)));
        assert!(receiver.close().await.is_ok());
    }
}
