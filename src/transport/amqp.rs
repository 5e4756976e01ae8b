//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                              | Key Methods             |
// |-----------------|----------------------------------------------------------|-------------------------|
// | AmqpTransport   | Broker connection, destinations and connectivity wiring  | connect, publishers     |
// | AmqpPublisher   | MessagePublisher bound to one exchange                   | open, publish, close    |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rabbitmq::{ConnectionEvent, ExchangeKind, Message, Publisher, RabbitMQConnection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SdkConfig;
use crate::domain::models::response::ResponseType;
use crate::domain::models::ticket::TicketType;
use crate::domain::services::connection_status::ConnectionStatus;

use super::receiver::ResponseReceiver;
use super::{FailureSink, MessagePublisher, OutboundMessage, PublishFailure, TransportError};

/// RabbitMQ-backed transport
///
/// Placements go to the fanout `{username}-Submit` exchange, every other ticket to the
/// topic `{username}-Control` exchange. Responses are consumed from the topic
/// `{username}-Reply` exchange, one queue per response type.
pub struct AmqpTransport {
    config: Arc<SdkConfig>,
    connection: Arc<RabbitMQConnection>,
    connection_status: ConnectionStatus,
    watcher: JoinHandle<()>,
}

impl AmqpTransport {
    /// Opens the broker connection and starts mirroring its health into `connection_status`
    ///
    /// The status stays disconnected until `mark_connected` is called, once every
    /// channel is open.
    pub async fn connect(
        config: Arc<SdkConfig>,
        connection_status: ConnectionStatus,
    ) -> Result<Self, TransportError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection =
            RabbitMQConnection::open(&config.rabbit_url, &config.app_id, Some(events_tx))
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;

        let watcher = tokio::spawn(watch_connection(events_rx, connection_status.clone()));
        info!("Connected to RabbitMQ as {}", config.app_id);

        Ok(Self {
            config,
            connection: Arc::new(connection),
            connection_status,
            watcher,
        })
    }

    /// One unopened publisher per ticket type
    pub fn publishers(&self) -> HashMap<TicketType, Arc<dyn MessagePublisher>> {
        TicketType::ALL
            .into_iter()
            .map(|ticket_type| {
                let (exchange, kind) = match ticket_type {
                    TicketType::Ticket => (self.config.submit_exchange(), ExchangeKind::Fanout),
                    _ => (self.config.control_exchange(), ExchangeKind::Topic),
                };
                let publisher: Arc<dyn MessagePublisher> = Arc::new(AmqpPublisher::new(
                    Arc::clone(&self.connection),
                    ticket_type,
                    exchange,
                    kind,
                ));
                (ticket_type, publisher)
            })
            .collect()
    }

    /// Creates one receiver per response type, bound to this node's routing keys
    pub async fn receivers(&self) -> Result<Vec<ResponseReceiver>, TransportError> {
        let exchange = self.config.reply_exchange();
        let mut receivers = Vec::with_capacity(ResponseType::ALL.len());

        for response_type in ResponseType::ALL {
            let routing_key = response_type.routing_key(self.config.node_id);
            let subscription = self
                .connection
                .subscription(&exchange, ExchangeKind::Topic, &[routing_key])
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            receivers.push(ResponseReceiver::new(response_type, Box::new(subscription)));
        }

        Ok(receivers)
    }

    /// Reports the transport as connected
    pub fn mark_connected(&self) {
        if self.connection.is_open() {
            self.connection_status.connect();
        } else {
            warn!("Connection closed before channels were ready");
        }
    }

    /// Closes the broker connection
    ///
    /// Publishers and receivers must already be closed.
    pub async fn close(self) -> Result<(), TransportError> {
        self.connection_status.disconnect("closed by client");
        let result = self
            .connection
            .close()
            .await
            .map_err(|e| TransportError::Close(e.to_string()));
        self.watcher.abort();
        result
    }
}

async fn watch_connection(
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    connection_status: ConnectionStatus,
) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Closed { reason } => connection_status.disconnect(&reason),
            ConnectionEvent::Blocked { reason } => {
                connection_status.disconnect(&format!("blocked: {}", reason))
            }
            ConnectionEvent::Unblocked => connection_status.connect(),
        }
    }
    debug!("Connection watcher stopped");
}

/// Publisher for one ticket type on its exchange
pub struct AmqpPublisher {
    connection: Arc<RabbitMQConnection>,
    ticket_type: TicketType,
    exchange: String,
    kind: ExchangeKind,
    publisher: Mutex<Option<Publisher>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl AmqpPublisher {
    pub fn new(
        connection: Arc<RabbitMQConnection>,
        ticket_type: TicketType,
        exchange: String,
        kind: ExchangeKind,
    ) -> Self {
        Self {
            connection,
            ticket_type,
            exchange,
            kind,
            publisher: Mutex::new(None),
            forwarder: Mutex::new(None),
        }
    }
}

#[async_trait]
impl MessagePublisher for AmqpPublisher {
    async fn open(&self, failures: FailureSink) -> Result<(), TransportError> {
        if self.publisher.lock().is_some() {
            debug!("{} publisher already open", self.ticket_type);
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel::<rabbitmq::PublishFailure>();
        let publisher = self
            .connection
            .publisher(&self.exchange, self.kind, Some(tx))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let forwarder = tokio::spawn(forward_failures(rx, self.ticket_type, failures));

        *self.publisher.lock() = Some(publisher);
        *self.forwarder.lock() = Some(forwarder);

        debug!("{} publisher open on {}", self.ticket_type, self.exchange);
        Ok(())
    }

    fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let guard = self.publisher.lock();
        let publisher = guard.as_ref().ok_or(TransportError::NotOpen)?;

        let mut amqp_message = Message::content(message.body)
            .with_message_id(&message.ticket_id)
            .with_correlation_id(&message.correlation_id);
        if let Some(routing_key) = &message.routing_key {
            amqp_message = amqp_message.with_topic(routing_key);
        }

        publisher
            .publish(amqp_message)
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let publisher = self.publisher.lock().take();
        let forwarder = self.forwarder.lock().take();

        let result = match publisher {
            Some(publisher) => publisher
                .close()
                .await
                .map_err(|e| TransportError::Close(e.to_string())),
            None => Ok(()),
        };

        // The publisher task is gone, so the forwarder ends once it has passed on
        // every failure that task reported
        if let Some(forwarder) = forwarder {
            if let Err(e) = forwarder.await {
                warn!("{} failure forwarder ended abnormally: {}", self.ticket_type, e);
            }
        }

        result
    }
}

// Runs until every sender of `rx` is gone; message ids carry the ticket id
async fn forward_failures(
    mut rx: mpsc::UnboundedReceiver<rabbitmq::PublishFailure>,
    ticket_type: TicketType,
    failures: FailureSink,
) {
    while let Some(failure) = rx.recv().await {
        let forwarded = PublishFailure {
            ticket_id: failure.message_id.unwrap_or_default(),
            ticket_type,
            correlation_id: failure.correlation_id,
            reason: failure.reason,
        };
        if failures.send(forwarded).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_failure(ticket_id: &str) -> rabbitmq::PublishFailure {
        rabbitmq::PublishFailure {
            exchange: "sdk-Control".to_string(),
            message_id: Some(ticket_id.to_string()),
            correlation_id: Some(format!("corr-{}", ticket_id)),
            reason: "publisher closed before sending".to_string(),
        }
    }

    #[tokio::test]
    async fn test_forwarder_drains_failures_reported_before_close() {
        let (broker_tx, broker_rx) = mpsc::unbounded_channel();
        let (sink, mut forwarded) = mpsc::unbounded_channel();

        broker_tx.send(broker_failure("t-1")).unwrap();
        broker_tx.send(broker_failure("t-2")).unwrap();
        // the publisher task dropping its sink is what ends the forwarder
        drop(broker_tx);

        forward_failures(broker_rx, TicketType::TicketCancel, sink).await;

        let first = forwarded.recv().await.unwrap();
        assert_eq!(first.ticket_id, "t-1");
        assert_eq!(first.ticket_type, TicketType::TicketCancel);
        assert_eq!(first.correlation_id.as_deref(), Some("corr-t-1"));
        assert_eq!(forwarded.recv().await.unwrap().ticket_id, "t-2");
        // the forwarder dropped its sink on the way out
        assert!(forwarded.recv().await.is_none());
    }
}
