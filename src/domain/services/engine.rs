//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name                 | Description                                            | Key Methods              |
// |----------------------|--------------------------------------------------------|--------------------------|
// | TicketEngine         | Send entry points, demultiplexing, timeout management  | send_ticket, open, close |
// | TicketEngineBuilder  | Wires config, bus, status and publishers together      | publisher, build         |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::select;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SdkConfig;
use crate::domain::models::response::{
    ResponseType, SdkResponse, TicketCancelResponse, TicketCashoutResponse,
    TicketNonSrSettleResponse, TicketResponse, UnparsableMessage,
};
use crate::domain::models::ticket::{
    SdkTicket, Ticket, TicketCancel, TicketCashout, TicketNonSrSettle, TicketType,
};
use crate::error::{SdkError, SdkResult};
use crate::events::{EventBus, TicketEvent};
use crate::transport::{InboundHandler, InboundMessage, MessagePublisher, PublishFailure};

use super::connection_status::ConnectionStatus;
use super::correlation::{Claimed, PendingRequests, Resolution, Unmatched, Waiter};
use super::ticket_sender::TicketSenderFactory;

struct EngineInner {
    config: Arc<SdkConfig>,
    senders: TicketSenderFactory,
    pending: PendingRequests,
    event_bus: EventBus,
    connection_status: ConnectionStatus,
    failures: Mutex<Option<mpsc::UnboundedReceiver<PublishFailure>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    opened: AtomicBool,
    closed: AtomicBool,
}

/// Bridges the asynchronous transport to fire-and-forget and blocking send calls
///
/// Clones share the same engine. Every request is tracked by ticket id until exactly one
/// of response, timeout, send failure or shutdown resolves it.
#[derive(Clone)]
pub struct TicketEngine {
    inner: Arc<EngineInner>,
}

/// Builder for [`TicketEngine`]
pub struct TicketEngineBuilder {
    config: SdkConfig,
    event_bus: Option<EventBus>,
    connection_status: Option<ConnectionStatus>,
    publishers: HashMap<TicketType, Arc<dyn MessagePublisher>>,
}

impl TicketEngineBuilder {
    /// Bus on which the engine raises its events; a new one is created otherwise
    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Connectivity handle shared with the transport
    pub fn connection_status(mut self, connection_status: ConnectionStatus) -> Self {
        self.connection_status = Some(connection_status);
        self
    }

    /// Binds `ticket_type` to the channel it is published on
    pub fn publisher(mut self, ticket_type: TicketType, publisher: Arc<dyn MessagePublisher>) -> Self {
        self.publishers.insert(ticket_type, publisher);
        self
    }

    /// Binds several ticket types at once
    pub fn publishers(
        mut self,
        publishers: impl IntoIterator<Item = (TicketType, Arc<dyn MessagePublisher>)>,
    ) -> Self {
        self.publishers.extend(publishers);
        self
    }

    pub fn build(self) -> TicketEngine {
        let config = Arc::new(self.config);
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(config.event_bus_capacity));
        let connection_status = self
            .connection_status
            .unwrap_or_else(|| ConnectionStatus::new(event_bus.clone()));

        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let senders = TicketSenderFactory::new(Arc::clone(&config), self.publishers, failures_tx);

        TicketEngine {
            inner: Arc::new(EngineInner {
                config,
                senders,
                pending: PendingRequests::new(),
                event_bus,
                connection_status,
                failures: Mutex::new(Some(failures_rx)),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                opened: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl TicketEngine {
    pub fn builder(config: SdkConfig) -> TicketEngineBuilder {
        TicketEngineBuilder {
            config,
            event_bus: None,
            connection_status: None,
            publishers: HashMap::new(),
        }
    }

    /// Opens every sender and starts the timeout sweeper and the failure listener
    ///
    /// Sends are accepted only once this has returned `Ok`.
    pub async fn open(&self) -> SdkResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SdkError::Closed);
        }

        self.inner.senders.open_all().await?;

        let Some(failures) = self.inner.failures.lock().take() else {
            debug!("Ticket engine already open");
            return Ok(());
        };

        let sweeper = tokio::spawn(run_timeout_sweeper(Arc::clone(&self.inner)));
        let listener = tokio::spawn(run_failure_listener(Arc::clone(&self.inner), failures));
        self.inner.tasks.lock().extend([sweeper, listener]);
        self.inner.opened.store(true, Ordering::SeqCst);

        info!("Ticket engine opened");
        Ok(())
    }

    /// Stops background work, releases every blocking caller and closes every sender
    ///
    /// Blocking callers still waiting return `SdkError::Closed`. Non-blocking requests
    /// are dropped without timeout events.
    pub async fn close(&self) -> SdkResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.shutdown.cancel();
        let released = self.inner.pending.close_all();
        if released > 0 {
            info!("Released {} pending requests on close", released);
        }

        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!("Engine task ended abnormally: {}", e);
            }
        }

        self.inner.senders.close_all().await?;
        info!("Ticket engine closed");
        Ok(())
    }

    /// Sends `ticket` without waiting for its response
    ///
    /// The outcome arrives later on the event bus as exactly one of `ResponseReceived`,
    /// `ResponseTimedOut` or `SendFailed`. Acknowledgments never expect a response.
    ///
    /// # Errors
    /// * `NotOpen` / `Closed` - the engine is not running, nothing was sent
    /// * `TransportUnavailable` - the transport is disconnected, nothing was sent
    /// * `DuplicateTicketId` - a request with this ticket id is still pending
    /// * `SenderNotRegistered` - no channel is bound to the ticket's type
    pub fn send_ticket(&self, ticket: impl Into<SdkTicket>) -> SdkResult<()> {
        let ticket = ticket.into();
        self.submit(&ticket, None)?;
        Ok(())
    }

    /// Sends a placement and waits for its response
    pub async fn send_ticket_blocking(&self, ticket: Ticket) -> SdkResult<TicketResponse> {
        match self.send_blocking(ticket.into()).await? {
            SdkResponse::Ticket(response) => Ok(response),
            other => Err(unexpected(other, ResponseType::Ticket)),
        }
    }

    /// Sends a cancellation and waits for its response
    pub async fn send_ticket_cancel_blocking(
        &self,
        ticket: TicketCancel,
    ) -> SdkResult<TicketCancelResponse> {
        match self.send_blocking(ticket.into()).await? {
            SdkResponse::TicketCancel(response) => Ok(response),
            other => Err(unexpected(other, ResponseType::TicketCancel)),
        }
    }

    /// Sends a cashout request and waits for its response
    pub async fn send_ticket_cashout_blocking(
        &self,
        ticket: TicketCashout,
    ) -> SdkResult<TicketCashoutResponse> {
        match self.send_blocking(ticket.into()).await? {
            SdkResponse::TicketCashout(response) => Ok(response),
            other => Err(unexpected(other, ResponseType::TicketCashout)),
        }
    }

    /// Sends a non-Sportradar settlement and waits for its response
    pub async fn send_ticket_non_sr_settle_blocking(
        &self,
        ticket: TicketNonSrSettle,
    ) -> SdkResult<TicketNonSrSettleResponse> {
        match self.send_blocking(ticket.into()).await? {
            SdkResponse::TicketNonSrSettle(response) => Ok(response),
            other => Err(unexpected(other, ResponseType::TicketNonSrSettle)),
        }
    }

    /// Acknowledges `response` back to the backend
    ///
    /// The bookmaker id is taken from the ticket originally sent, while it is still
    /// cached, and from the configuration otherwise.
    pub fn acknowledge(&self, response: &SdkResponse, mark_accepted: bool) -> SdkResult<()> {
        let response_type = response.response_type();
        let origin = match response_type {
            ResponseType::Ticket => TicketType::Ticket,
            ResponseType::TicketCancel => TicketType::TicketCancel,
            ResponseType::TicketCashout | ResponseType::TicketNonSrSettle => {
                return Err(SdkError::AckNotSupported(response_type));
            }
        };

        let bookmaker_id = self
            .inner
            .senders
            .get(origin)
            .ok()
            .and_then(|sender| sender.get_sent_ticket(response.ticket_id()))
            .map(|ticket| ticket.bookmaker_id())
            .unwrap_or(self.inner.config.bookmaker_id);

        let ack = response
            .build_ack(bookmaker_id, mark_accepted)
            .ok_or(SdkError::AckNotSupported(response_type))?;
        self.send_ticket(ack)
    }

    /// Subscribes to the engine's events
    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.inner.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn connection_status(&self) -> &ConnectionStatus {
        &self.inner.connection_status
    }

    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }

    /// Returns the ticket sent under `ticket_id` while it is within its response window
    pub fn get_sent_ticket(&self, ticket_type: TicketType, ticket_id: &str) -> Option<SdkTicket> {
        self.inner
            .senders
            .get(ticket_type)
            .ok()
            .and_then(|sender| sender.get_sent_ticket(ticket_id))
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.pending_count()
    }

    pub fn is_pending(&self, ticket_id: &str) -> bool {
        self.inner.pending.is_pending(ticket_id)
    }

    pub fn blocking_count(&self) -> usize {
        self.inner.pending.blocking_count()
    }

    // Checks, registers and publishes; returns the entry's generation and response window
    fn submit(&self, ticket: &SdkTicket, waiter: Option<Waiter>) -> SdkResult<(u64, Duration)> {
        let inner = &self.inner;
        let ticket_id = ticket.ticket_id();

        if inner.closed.load(Ordering::SeqCst) {
            return Err(SdkError::Closed);
        }
        if !inner.opened.load(Ordering::SeqCst) {
            return Err(SdkError::NotOpen);
        }
        if !inner.connection_status.is_connected() {
            warn!("Not sending {}: transport disconnected", ticket_id);
            return Err(SdkError::TransportUnavailable {
                ticket_id: ticket_id.to_owned(),
            });
        }

        let ticket_type = ticket.ticket_type();
        let sender = inner.senders.get(ticket_type)?;
        let correlation_id = Uuid::new_v4().to_string();
        let timeout = sender.get_cache_timeout(ticket);

        // Registration fails with Closed once close() has drained the table
        let generation = match ticket_type.response_type() {
            Some(_) => inner.pending.register(
                ticket_id,
                &correlation_id,
                ticket_type,
                timeout,
                waiter,
            )?,
            None => 0,
        };

        inner.connection_status.on_ticket_sent(ticket_id);
        sender.send_ticket(ticket, &correlation_id);
        debug!(
            "Sent {} {} (correlation {}, timeout {:?})",
            ticket_type, ticket_id, correlation_id, timeout
        );

        Ok((generation, timeout))
    }

    async fn send_blocking(&self, ticket: SdkTicket) -> SdkResult<SdkResponse> {
        let (tx, mut rx) = oneshot::channel();
        let (generation, timeout) = self.submit(&ticket, Some(tx))?;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        let ticket_id = ticket.ticket_id();
        let _guard = WaitGuard {
            pending: &self.inner.pending,
            ticket_id,
            generation,
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SdkError::Closed),
            Err(_) => {
                if self.inner.pending.claim_own(ticket_id, generation) {
                    warn!("Blocking {} {} timed out", ticket.ticket_type(), ticket_id);
                    return Err(SdkError::ResponseTimeout {
                        ticket_id: ticket_id.to_owned(),
                        timeout_ms,
                    });
                }
                // Lost the claim: the outcome was handed over while we were timing out
                match rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SdkError::ResponseTimeout {
                        ticket_id: ticket_id.to_owned(),
                        timeout_ms,
                    }),
                }
            }
        }
    }

    fn publish_event(&self, event: TicketEvent) {
        publish_event(&self.inner.event_bus, event);
    }
}

impl InboundHandler for TicketEngine {
    fn on_message_received(&self, message: InboundMessage) {
        let correlation_id = message.correlation_id.as_deref();

        let response = match SdkResponse::parse(message.response_type, &message.body, correlation_id) {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "Unparsable {} on {}: {}",
                    message.response_type, message.routing_key, e
                );
                let unparsable = UnparsableMessage::new(
                    message.response_type,
                    &message.routing_key,
                    correlation_id,
                    &message.body,
                    e,
                );
                self.publish_event(TicketEvent::UnparsableMessageReceived(unparsable));
                return;
            }
        };

        self.inner
            .connection_status
            .on_ticket_received(response.ticket_id());

        match self.inner.pending.resolve(response) {
            Resolution::Waiter => debug!("Response handed to blocking caller"),
            Resolution::Subscribers(response) => {
                debug!("{} received for {}", response.response_type(), response.ticket_id());
                self.publish_event(TicketEvent::ResponseReceived(response));
            }
            Resolution::Unmatched(response, Unmatched::NotPending) => {
                warn!(
                    "Dropping {} for {}: no pending request",
                    response.response_type(),
                    response.ticket_id()
                );
            }
            Resolution::Unmatched(response, Unmatched::CorrelationMismatch { expected }) => {
                warn!(
                    "Dropping stale {} for {}: correlation {:?}, expected {}",
                    response.response_type(),
                    response.ticket_id(),
                    response.correlation_id(),
                    expected
                );
            }
            Resolution::Unmatched(response, Unmatched::TypeMismatch { expected }) => {
                warn!(
                    "Dropping {} for {}: request expects {}",
                    response.response_type(),
                    response.ticket_id(),
                    expected
                );
            }
        }
    }
}

impl SdkResponse {
    /// Acknowledges this response through `engine`
    pub fn acknowledge(&self, engine: &TicketEngine, mark_accepted: bool) -> SdkResult<()> {
        engine.acknowledge(self, mark_accepted)
    }
}

// Claims the blocking entry if the waiting future is dropped before it finishes
struct WaitGuard<'a> {
    pending: &'a PendingRequests,
    ticket_id: &'a str,
    generation: u64,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.pending.claim_own(self.ticket_id, self.generation) {
            debug!("Abandoned blocking wait for {}", self.ticket_id);
        }
    }
}

fn unexpected(response: SdkResponse, expected: ResponseType) -> SdkError {
    SdkError::UnexpectedResponse {
        ticket_id: response.ticket_id().to_owned(),
        expected,
        received: response.response_type(),
    }
}

fn publish_event(event_bus: &EventBus, event: TicketEvent) {
    if let Err(e) = event_bus.publish(event) {
        error!("{}", e);
    }
}

async fn run_timeout_sweeper(inner: Arc<EngineInner>) {
    debug!("Timeout sweeper started");

    loop {
        let next = inner.pending.next_deadline();
        let sleep = async {
            match next {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        select! {
            _ = inner.shutdown.cancelled() => break,
            _ = inner.pending.deadline_changed() => continue,
            _ = sleep => {
                for expired in inner.pending.expire(Instant::now()) {
                    warn!("{} {} timed out", expired.ticket_type, expired.ticket_id);
                    publish_event(
                        &inner.event_bus,
                        TicketEvent::ResponseTimedOut {
                            ticket_id: expired.ticket_id,
                            ticket_type: expired.ticket_type,
                            correlation_id: expired.correlation_id,
                        },
                    );
                }
            }
        }
    }

    debug!("Timeout sweeper stopped");
}

async fn run_failure_listener(
    inner: Arc<EngineInner>,
    mut failures: mpsc::UnboundedReceiver<PublishFailure>,
) {
    debug!("Failure listener started");

    loop {
        let failure = select! {
            _ = inner.shutdown.cancelled() => break,
            failure = failures.recv() => match failure {
                Some(failure) => failure,
                None => break,
            },
        };

        error!(
            "Publishing {} {} failed: {}",
            failure.ticket_type, failure.ticket_id, failure.reason
        );

        let notify = match failure.ticket_type.response_type() {
            None => true,
            Some(_) => match inner.pending.fail(
                &failure.ticket_id,
                failure.correlation_id.as_deref(),
                &failure.reason,
            ) {
                Some(Claimed::NonBlocking) => true,
                Some(Claimed::Waiter) => false,
                None => {
                    debug!("{} already resolved, failure ignored", failure.ticket_id);
                    false
                }
            },
        };

        if notify {
            publish_event(
                &inner.event_bus,
                TicketEvent::SendFailed {
                    ticket_id: failure.ticket_id,
                    ticket_type: failure.ticket_type,
                    reason: failure.reason,
                },
            );
        }
    }

    debug!("Failure listener stopped");
}
