//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name                 | Description                                         | Key Methods             |
// |----------------------|-----------------------------------------------------|-------------------------|
// | SentTicketCache      | TTL map of recently sent tickets                    | insert, get             |
// | TicketSender         | Publishes one ticket type on its destination        | send_ticket             |
// | TicketSenderFactory  | Resolves senders by ticket type, owns lifecycle     | get, open_all           |
//--------------------------------------------------------------------------------------------------

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::SdkConfig;
use crate::domain::models::ticket::{SdkTicket, TicketType};
use crate::error::SdkError;
use crate::transport::{FailureSink, MessagePublisher, OutboundMessage, PublishFailure, TransportError};

/// Routing key used on the control exchange; `None` for the broadcast placement exchange
pub fn routing_key(ticket_type: TicketType) -> Option<&'static str> {
    match ticket_type {
        TicketType::Ticket => None,
        TicketType::TicketCancel => Some("cancel"),
        TicketType::TicketCashout => Some("cashout"),
        TicketType::TicketNonSrSettle => Some("nonsrsettle"),
        TicketType::TicketAck => Some("ack"),
        TicketType::TicketCancelAck => Some("cancel.ack"),
    }
}

#[derive(Debug)]
struct CachedTicket {
    ticket: SdkTicket,
    expires_at: Instant,
    sequence: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CachedTicket>,
    // Min-heap of expiries; items whose sequence no longer matches were overwritten
    expiries: BinaryHeap<Reverse<(Instant, u64, String)>>,
    next_sequence: u64,
}

impl CacheState {
    fn purge_expired(&mut self, now: Instant) {
        while let Some(Reverse((at, _, _))) = self.expiries.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((_, sequence, ticket_id))) = self.expiries.pop() else {
                break;
            };
            if self
                .entries
                .get(&ticket_id)
                .is_some_and(|cached| cached.sequence == sequence)
            {
                self.entries.remove(&ticket_id);
            }
        }
    }
}

/// Recently sent tickets, each expiring after its own TTL
///
/// Expired entries are invisible to `get`. Each insert purges only the entries that
/// are already due, oldest expiry first.
#[derive(Debug, Default)]
pub struct SentTicketCache {
    state: RwLock<CacheState>,
}

impl SentTicketCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ticket: SdkTicket, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now + ttl;
        let ticket_id = ticket.ticket_id().to_owned();

        let mut state = self.state.write();
        state.purge_expired(now);

        state.next_sequence += 1;
        let sequence = state.next_sequence;
        state
            .expiries
            .push(Reverse((expires_at, sequence, ticket_id.clone())));
        state.entries.insert(
            ticket_id,
            CachedTicket {
                ticket,
                expires_at,
                sequence,
            },
        );
    }

    pub fn get(&self, ticket_id: &str) -> Option<SdkTicket> {
        let state = self.state.read();
        state
            .entries
            .get(ticket_id)
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.ticket.clone())
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .read()
            .entries
            .values()
            .filter(|cached| cached.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Publishes tickets of a single type
///
/// Sending never fails on the caller's path once the ticket is handed over: serialization
/// and publish errors are reported on the failure sink and handled by the engine.
pub struct TicketSender {
    ticket_type: TicketType,
    publisher: Arc<dyn MessagePublisher>,
    config: Arc<SdkConfig>,
    failures: FailureSink,
    cache: SentTicketCache,
}

impl TicketSender {
    pub fn new(
        ticket_type: TicketType,
        publisher: Arc<dyn MessagePublisher>,
        config: Arc<SdkConfig>,
        failures: FailureSink,
    ) -> Self {
        Self {
            ticket_type,
            publisher,
            config,
            failures,
            cache: SentTicketCache::new(),
        }
    }

    pub fn ticket_type(&self) -> TicketType {
        self.ticket_type
    }

    /// Opens the bound publish channel
    pub async fn open(&self) -> Result<(), TransportError> {
        self.publisher.open(self.failures.clone()).await?;
        info!("{} sender opened", self.ticket_type);
        Ok(())
    }

    /// Closes the bound publish channel
    pub async fn close(&self) -> Result<(), TransportError> {
        self.publisher.close().await?;
        info!("{} sender closed", self.ticket_type);
        Ok(())
    }

    /// Serializes and publishes `ticket`, remembering it for the response window
    ///
    /// # Arguments
    /// * `ticket` - Ticket of this sender's type
    /// * `correlation_id` - Engine-assigned id of this send attempt
    pub fn send_ticket(&self, ticket: &SdkTicket, correlation_id: &str) {
        let ticket_id = ticket.ticket_id();

        let body = match ticket.to_json() {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize {} {}: {}", self.ticket_type, ticket_id, e);
                self.report_failure(ticket_id, correlation_id, format!("serialization failed: {}", e));
                return;
            }
        };

        self.cache.insert(ticket.clone(), self.get_cache_timeout(ticket));

        let message = OutboundMessage {
            ticket_id: ticket_id.to_owned(),
            ticket_type: self.ticket_type,
            correlation_id: correlation_id.to_owned(),
            routing_key: routing_key(self.ticket_type).map(str::to_owned),
            body,
        };

        match self.publisher.publish(message) {
            Ok(()) => debug!(
                "Published {} {} (correlation {})",
                self.ticket_type, ticket_id, correlation_id
            ),
            Err(e) => {
                error!("Failed to publish {} {}: {}", self.ticket_type, ticket_id, e);
                self.report_failure(ticket_id, correlation_id, e.to_string());
            }
        }
    }

    /// Returns the ticket sent under `ticket_id` while it is still within its response window
    pub fn get_sent_ticket(&self, ticket_id: &str) -> Option<SdkTicket> {
        self.cache.get(ticket_id)
    }

    /// How long to wait for a response to `ticket`
    ///
    /// Placements pick the live or prematch window; acks reuse the window of the
    /// request they acknowledge.
    pub fn get_cache_timeout(&self, ticket: &SdkTicket) -> Duration {
        match ticket.ticket_type() {
            TicketType::Ticket => self.config.ticket_timeout(ticket.is_live()),
            TicketType::TicketAck => self.config.ticket_timeout(false),
            TicketType::TicketCancel | TicketType::TicketCancelAck => {
                self.config.cancellation_timeout()
            }
            TicketType::TicketCashout => self.config.cashout_timeout(),
            TicketType::TicketNonSrSettle => self.config.non_sr_settle_timeout(),
        }
    }

    fn report_failure(&self, ticket_id: &str, correlation_id: &str, reason: String) {
        let failure = PublishFailure {
            ticket_id: ticket_id.to_owned(),
            ticket_type: self.ticket_type,
            correlation_id: Some(correlation_id.to_owned()),
            reason,
        };
        if self.failures.send(failure).is_err() {
            debug!("Failure listener gone, dropping failure for {}", ticket_id);
        }
    }
}

/// Owns one sender per registered ticket type
pub struct TicketSenderFactory {
    senders: HashMap<TicketType, TicketSender>,
}

impl TicketSenderFactory {
    /// Builds a sender for every publisher given
    ///
    /// Ticket types without a publisher have no sender; sending them fails with
    /// `SenderNotRegistered`.
    pub fn new(
        config: Arc<SdkConfig>,
        publishers: HashMap<TicketType, Arc<dyn MessagePublisher>>,
        failures: FailureSink,
    ) -> Self {
        let senders = publishers
            .into_iter()
            .map(|(ticket_type, publisher)| {
                let sender =
                    TicketSender::new(ticket_type, publisher, Arc::clone(&config), failures.clone());
                (ticket_type, sender)
            })
            .collect();

        Self { senders }
    }

    /// Resolves the sender for `ticket_type`
    pub fn get(&self, ticket_type: TicketType) -> Result<&TicketSender, SdkError> {
        self.senders
            .get(&ticket_type)
            .ok_or(SdkError::SenderNotRegistered(ticket_type))
    }

    /// Opens every sender, stopping at the first failure
    pub async fn open_all(&self) -> Result<(), TransportError> {
        for sender in self.senders.values() {
            sender.open().await?;
        }
        Ok(())
    }

    /// Closes every sender; all are attempted and the first error is returned
    pub async fn close_all(&self) -> Result<(), TransportError> {
        let mut first_error = None;
        for sender in self.senders.values() {
            if let Err(e) = sender.close().await {
                error!("Failed to close {} sender: {}", sender.ticket_type(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ticket::{TicketCancel, tests::create_test_ticket};
    use crate::transport::MockMessagePublisher;
    use tokio::sync::mpsc;

    fn sender_with(
        ticket_type: TicketType,
        publisher: MockMessagePublisher,
    ) -> (TicketSender, mpsc::UnboundedReceiver<PublishFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = SdkConfig::default()
            .with_ticket_timeouts(12_000, 3_000)
            .with_cancellation_timeout(60_000);
        let sender = TicketSender::new(ticket_type, Arc::new(publisher), Arc::new(config), tx);
        (sender, rx)
    }

    #[tokio::test]
    async fn test_send_ticket_publishes_with_correlation_id() {
        let mut publisher = MockMessagePublisher::new();
        publisher
            .expect_publish()
            .withf(|m| {
                m.ticket_id == "t-1"
                    && m.correlation_id == "corr-1"
                    && m.routing_key.is_none()
                    && !m.body.is_empty()
            })
            .times(1)
            .returning(|_| Ok(()));

        let (sender, mut failures) = sender_with(TicketType::Ticket, publisher);
        let ticket: SdkTicket = create_test_ticket("t-1", "sr:match:1").into();
        sender.send_ticket(&ticket, "corr-1");

        assert!(sender.get_sent_ticket("t-1").is_some());
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_error_is_reported_not_returned() {
        let mut publisher = MockMessagePublisher::new();
        publisher
            .expect_publish()
            .returning(|_| Err(TransportError::NotOpen));

        let (sender, mut failures) = sender_with(TicketType::TicketCancel, publisher);
        let ticket: SdkTicket = TicketCancel::new("t-2", 7669, 101).into();
        sender.send_ticket(&ticket, "corr-2");

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.ticket_id, "t-2");
        assert_eq!(failure.ticket_type, TicketType::TicketCancel);
        assert_eq!(failure.correlation_id.as_deref(), Some("corr-2"));
    }

    #[tokio::test]
    async fn test_cancel_uses_control_routing_key() {
        let mut publisher = MockMessagePublisher::new();
        publisher
            .expect_publish()
            .withf(|m| m.routing_key.as_deref() == Some("cancel"))
            .times(1)
            .returning(|_| Ok(()));

        let (sender, _failures) = sender_with(TicketType::TicketCancel, publisher);
        sender.send_ticket(&TicketCancel::new("t-3", 7669, 101).into(), "corr-3");
    }

    #[test]
    fn test_cache_timeout_live_split() {
        let (sender, _failures) = sender_with(TicketType::Ticket, MockMessagePublisher::new());

        let live: SdkTicket = create_test_ticket("t-live", "lcoo:409/1/*/1").into();
        let prematch: SdkTicket = create_test_ticket("t-pre", "uof:1/sr:match:1/1/1").into();

        assert_eq!(sender.get_cache_timeout(&live), Duration::from_millis(12_000));
        assert_eq!(sender.get_cache_timeout(&prematch), Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sent_ticket_cache_expires() {
        let cache = SentTicketCache::new();
        cache.insert(create_test_ticket("t-1", "sr:1").into(), Duration::from_millis(100));
        assert!(cache.get("t-1").is_some());

        tokio::time::advance(Duration::from_millis(101)).await;
        assert!(cache.get("t-1").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_purges_only_due_entries() {
        let cache = SentTicketCache::new();
        for i in 0..100 {
            cache.insert(
                create_test_ticket(&format!("t-{}", i), "sr:1").into(),
                Duration::from_millis(100),
            );
        }
        cache.insert(create_test_ticket("t-long", "sr:1").into(), Duration::from_secs(60));

        tokio::time::advance(Duration::from_millis(150)).await;
        cache.insert(create_test_ticket("t-new", "sr:1").into(), Duration::from_secs(60));

        let state = cache.state.read();
        assert_eq!(state.entries.len(), 2);
        assert_eq!(state.expiries.len(), 2);
        drop(state);
        assert!(cache.get("t-long").is_some());
        assert!(cache.get("t-new").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinsert_outlives_earlier_expiry() {
        let cache = SentTicketCache::new();
        cache.insert(create_test_ticket("t-1", "sr:1").into(), Duration::from_millis(100));
        cache.insert(create_test_ticket("t-1", "sr:1").into(), Duration::from_secs(10));

        tokio::time::advance(Duration::from_millis(150)).await;
        cache.insert(create_test_ticket("t-2", "sr:1").into(), Duration::from_secs(10));

        // the first expiry was stale and must not evict the second insert
        assert!(cache.get("t-1").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_factory_rejects_unregistered_type() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut publishers: HashMap<TicketType, Arc<dyn MessagePublisher>> = HashMap::new();
        publishers.insert(TicketType::Ticket, Arc::new(MockMessagePublisher::new()));
        let factory = TicketSenderFactory::new(Arc::new(SdkConfig::default()), publishers, tx);

        assert!(factory.get(TicketType::Ticket).is_ok());
        assert!(matches!(
            factory.get(TicketType::TicketCashout),
            Err(SdkError::SenderNotRegistered(TicketType::TicketCashout))
        ));
    }
}
