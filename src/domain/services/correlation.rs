//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name              | Description                                              | Key Methods        |
// |-------------------|----------------------------------------------------------|--------------------|
// | PendingRequests   | In-flight requests keyed by ticket id, with deadlines    | register, resolve  |
// | Resolution        | Outcome of matching a response against the table         |                    |
// | Unmatched         | Why a response was dropped                               |                    |
// | Claimed           | Outcome of claiming an entry for a send failure          |                    |
// | Expired           | Non-blocking request whose deadline passed               |                    |
//--------------------------------------------------------------------------------------------------

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::models::response::{ResponseType, SdkResponse};
use crate::domain::models::ticket::TicketType;
use crate::error::SdkError;

/// Slot through which a blocking caller receives its outcome
pub type Waiter = oneshot::Sender<Result<SdkResponse, SdkError>>;

enum Shape {
    NonBlocking,
    Blocking(Waiter),
}

struct PendingEntry {
    correlation_id: String,
    ticket_type: TicketType,
    generation: u64,
    shape: Shape,
}

#[derive(Default)]
struct Tables {
    entries: HashMap<String, PendingEntry>,
    // Min-heap of non-blocking deadlines; items whose generation no longer matches are stale
    deadlines: BinaryHeap<Reverse<(Instant, u64, String)>>,
    next_generation: u64,
    closed: bool,
}

impl Tables {
    fn is_current(&self, ticket_id: &str, generation: u64) -> bool {
        self.entries
            .get(ticket_id)
            .is_some_and(|entry| entry.generation == generation)
    }
}

/// Result of matching an inbound response
#[derive(Debug)]
pub enum Resolution {
    /// The blocking caller waiting on this ticket now holds the response
    Waiter,
    /// A non-blocking request was resolved; subscribers should be told
    Subscribers(SdkResponse),
    /// Nothing was claimed and the response must be dropped
    Unmatched(SdkResponse, Unmatched),
}

/// Reason a response matched no pending request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unmatched {
    /// Already resolved, or never sent by this instance
    NotPending,
    /// Answers an earlier send attempt with the same ticket id
    CorrelationMismatch { expected: String },
    /// Arrived on a channel other than the one the request expects
    TypeMismatch { expected: ResponseType },
}

/// Result of claiming an entry on behalf of a send failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claimed {
    /// The blocking caller now holds the error
    Waiter,
    /// A non-blocking request was resolved; subscribers should be told
    NonBlocking,
}

/// Non-blocking request whose deadline passed before any response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub ticket_id: String,
    pub ticket_type: TicketType,
    pub correlation_id: String,
}

/// Table of in-flight requests
///
/// Every way a request can end (response, deadline, send failure, shutdown, an abandoned
/// waiter) goes through one removal under the same lock, so exactly one of them wins.
/// Blocking waiters are completed while the lock is held: once an entry is gone its
/// waiter's slot is already filled.
#[derive(Default)]
pub struct PendingRequests {
    tables: Mutex<Tables>,
    deadline_changed: Notify,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request for `ticket_id`
    ///
    /// # Arguments
    /// * `ticket_id` - Caller-chosen id, unique among pending requests
    /// * `correlation_id` - Id of this send attempt
    /// * `ticket_type` - Kind of request, decides which response type matches
    /// * `timeout` - Response window; tracked here only for non-blocking requests
    /// * `waiter` - Present for blocking requests
    ///
    /// # Returns
    /// The generation of the new entry, used by the waiter to claim it back
    ///
    /// # Errors
    /// * `DuplicateTicketId` - `ticket_id` is already pending
    /// * `Closed` - `close_all` already ran
    pub fn register(
        &self,
        ticket_id: &str,
        correlation_id: &str,
        ticket_type: TicketType,
        timeout: Duration,
        waiter: Option<Waiter>,
    ) -> Result<u64, SdkError> {
        let mut tables = self.tables.lock();
        if tables.closed {
            return Err(SdkError::Closed);
        }
        if tables.entries.contains_key(ticket_id) {
            return Err(SdkError::DuplicateTicketId(ticket_id.to_owned()));
        }

        tables.next_generation += 1;
        let generation = tables.next_generation;

        let shape = match waiter {
            Some(waiter) => Shape::Blocking(waiter),
            None => {
                let deadline = Instant::now() + timeout;
                let earliest = tables
                    .deadlines
                    .peek()
                    .is_none_or(|Reverse((at, _, _))| deadline < *at);
                tables
                    .deadlines
                    .push(Reverse((deadline, generation, ticket_id.to_owned())));
                if earliest {
                    self.deadline_changed.notify_one();
                }
                Shape::NonBlocking
            }
        };

        tables.entries.insert(
            ticket_id.to_owned(),
            PendingEntry {
                correlation_id: correlation_id.to_owned(),
                ticket_type,
                generation,
                shape,
            },
        );

        Ok(generation)
    }

    /// Matches `response` against the table and claims its entry on success
    pub fn resolve(&self, response: SdkResponse) -> Resolution {
        let mut tables = self.tables.lock();

        let Some(entry) = tables.entries.get(response.ticket_id()) else {
            return Resolution::Unmatched(response, Unmatched::NotPending);
        };

        let expected = entry.ticket_type.response_type();
        if expected != Some(response.response_type()) {
            let reason = match expected {
                Some(expected) => Unmatched::TypeMismatch { expected },
                None => Unmatched::NotPending,
            };
            return Resolution::Unmatched(response, reason);
        }

        if let Some(received) = response.correlation_id() {
            if received != entry.correlation_id {
                let expected = entry.correlation_id.clone();
                return Resolution::Unmatched(response, Unmatched::CorrelationMismatch { expected });
            }
        }

        let Some(entry) = tables.entries.remove(response.ticket_id()) else {
            return Resolution::Unmatched(response, Unmatched::NotPending);
        };

        match entry.shape {
            Shape::Blocking(waiter) => {
                if waiter.send(Ok(response)).is_err() {
                    debug!("Blocking caller is gone, response discarded");
                }
                Resolution::Waiter
            }
            Shape::NonBlocking => Resolution::Subscribers(response),
        }
    }

    /// Claims the entry of a ticket whose publish failed
    ///
    /// A failure carrying a correlation id only claims the attempt it belongs to.
    pub fn fail(
        &self,
        ticket_id: &str,
        correlation_id: Option<&str>,
        reason: &str,
    ) -> Option<Claimed> {
        let mut tables = self.tables.lock();

        let entry = tables.entries.get(ticket_id)?;
        if correlation_id.is_some_and(|id| id != entry.correlation_id) {
            return None;
        }
        let entry = tables.entries.remove(ticket_id)?;

        match entry.shape {
            Shape::Blocking(waiter) => {
                let _ = waiter.send(Err(SdkError::PublishFailed {
                    ticket_id: ticket_id.to_owned(),
                    reason: reason.to_owned(),
                }));
                Some(Claimed::Waiter)
            }
            Shape::NonBlocking => Some(Claimed::NonBlocking),
        }
    }

    /// Claims the entry registered under `generation`, if nothing else has yet
    ///
    /// Used by a blocking caller whose wait elapsed or was abandoned.
    pub fn claim_own(&self, ticket_id: &str, generation: u64) -> bool {
        let mut tables = self.tables.lock();
        if !tables.is_current(ticket_id, generation) {
            return false;
        }
        tables.entries.remove(ticket_id).is_some()
    }

    /// Claims every non-blocking entry whose deadline is at or before `now`
    pub fn expire(&self, now: Instant) -> Vec<Expired> {
        let mut tables = self.tables.lock();
        let mut expired = Vec::new();

        while let Some(Reverse((at, _, _))) = tables.deadlines.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((_, generation, ticket_id))) = tables.deadlines.pop() else {
                break;
            };
            if !tables.is_current(&ticket_id, generation) {
                continue;
            }
            if let Some(entry) = tables.entries.remove(&ticket_id) {
                expired.push(Expired {
                    ticket_id,
                    ticket_type: entry.ticket_type,
                    correlation_id: entry.correlation_id,
                });
            }
        }

        expired
    }

    /// Earliest deadline still backed by a live entry
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut tables = self.tables.lock();

        while let Some(Reverse((at, generation, ticket_id))) = tables.deadlines.peek() {
            if tables.is_current(ticket_id, *generation) {
                return Some(*at);
            }
            tables.deadlines.pop();
        }

        None
    }

    /// Resolves once a registration may have moved the earliest deadline forward
    pub async fn deadline_changed(&self) {
        self.deadline_changed.notified().await
    }

    /// Removes every entry, failing blocking callers with `Closed`
    ///
    /// Non-blocking entries are discarded silently. Later registrations are refused.
    ///
    /// # Returns
    /// The number of entries removed
    pub fn close_all(&self) -> usize {
        let mut tables = self.tables.lock();
        tables.closed = true;
        tables.deadlines.clear();

        let drained: Vec<_> = tables.entries.drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            if let Shape::Blocking(waiter) = entry.shape {
                let _ = waiter.send(Err(SdkError::Closed));
            }
        }

        count
    }

    pub fn pending_count(&self) -> usize {
        self.tables.lock().entries.len()
    }

    pub fn is_pending(&self, ticket_id: &str) -> bool {
        self.tables.lock().entries.contains_key(ticket_id)
    }

    pub fn blocking_count(&self) -> usize {
        self.tables
            .lock()
            .entries
            .values()
            .filter(|entry| matches!(entry.shape, Shape::Blocking(_)))
            .count()
    }

    /// Number of queued deadlines, stale ones included
    pub fn deadline_count(&self) -> usize {
        self.tables.lock().deadlines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::response::tests::{cancel_response_json, ticket_response_json};

    fn ticket_response(ticket_id: &str, correlation_id: Option<&str>) -> SdkResponse {
        SdkResponse::parse(
            ResponseType::Ticket,
            &ticket_response_json(ticket_id, "accepted"),
            correlation_id,
        )
        .unwrap()
    }

    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_duplicate_ticket_id_is_rejected() {
        let pending = PendingRequests::new();
        pending
            .register("t-1", "c-1", TicketType::Ticket, LONG, None)
            .unwrap();

        let second = pending.register("t-1", "c-2", TicketType::Ticket, LONG, None);
        assert_eq!(second, Err(SdkError::DuplicateTicketId("t-1".to_string())));

        // first request untouched
        assert!(matches!(
            pending.resolve(ticket_response("t-1", Some("c-1"))),
            Resolution::Subscribers(_)
        ));
    }

    #[tokio::test]
    async fn test_resolve_claims_once() {
        let pending = PendingRequests::new();
        pending
            .register("t-1", "c-1", TicketType::Ticket, LONG, None)
            .unwrap();

        assert!(matches!(
            pending.resolve(ticket_response("t-1", Some("c-1"))),
            Resolution::Subscribers(_)
        ));
        assert!(matches!(
            pending.resolve(ticket_response("t-1", Some("c-1"))),
            Resolution::Unmatched(_, Unmatched::NotPending)
        ));
        assert_eq!(pending.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_blocking_waiter_receives_response() {
        let pending = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        pending
            .register("t-1", "c-1", TicketType::Ticket, LONG, Some(tx))
            .unwrap();
        assert_eq!(pending.blocking_count(), 1);
        assert_eq!(pending.deadline_count(), 0);

        assert!(matches!(
            pending.resolve(ticket_response("t-1", None)),
            Resolution::Waiter
        ));
        let delivered = rx.await.unwrap().unwrap();
        assert_eq!(delivered.ticket_id(), "t-1");
        assert_eq!(pending.blocking_count(), 0);
    }

    #[tokio::test]
    async fn test_correlation_mismatch_is_stale() {
        let pending = PendingRequests::new();
        pending
            .register("t-1", "c-2", TicketType::Ticket, LONG, None)
            .unwrap();

        match pending.resolve(ticket_response("t-1", Some("c-1"))) {
            Resolution::Unmatched(_, Unmatched::CorrelationMismatch { expected }) => {
                assert_eq!(expected, "c-2")
            }
            other => panic!("unexpected resolution {:?}", other),
        }
        assert!(pending.is_pending("t-1"));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_stale() {
        let pending = PendingRequests::new();
        pending
            .register("t-1", "c-1", TicketType::Ticket, LONG, None)
            .unwrap();

        let cancel =
            SdkResponse::parse(ResponseType::TicketCancel, &cancel_response_json("t-1", "cancelled"), None)
                .unwrap();
        assert!(matches!(
            pending.resolve(cancel),
            Resolution::Unmatched(_, Unmatched::TypeMismatch { expected: ResponseType::Ticket })
        ));
        assert!(pending.is_pending("t-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_only_claims_due_entries() {
        let pending = PendingRequests::new();
        pending
            .register("t-short", "c-1", TicketType::Ticket, Duration::from_millis(100), None)
            .unwrap();
        pending
            .register("t-long", "c-2", TicketType::TicketCancel, Duration::from_millis(300), None)
            .unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;
        let expired = pending.expire(Instant::now());

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].ticket_id, "t-short");
        assert!(pending.is_pending("t-long"));
        assert!(pending.next_deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_entry_never_expires() {
        let pending = PendingRequests::new();
        pending
            .register("t-1", "c-1", TicketType::Ticket, Duration::from_millis(100), None)
            .unwrap();
        pending.resolve(ticket_response("t-1", None));

        assert!(pending.next_deadline().is_none());
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(pending.expire(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_deadline_does_not_expire_reused_ticket_id() {
        let pending = PendingRequests::new();
        pending
            .register("t-1", "c-1", TicketType::Ticket, Duration::from_millis(100), None)
            .unwrap();
        pending.resolve(ticket_response("t-1", None));
        pending
            .register("t-1", "c-2", TicketType::Ticket, Duration::from_millis(500), None)
            .unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(pending.expire(Instant::now()).is_empty());
        assert!(pending.is_pending("t-1"));
    }

    #[tokio::test]
    async fn test_fail_delivers_error_to_waiter() {
        let pending = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        pending
            .register("t-1", "c-1", TicketType::TicketCashout, LONG, Some(tx))
            .unwrap();

        assert_eq!(pending.fail("t-1", Some("c-other"), "nope"), None);
        assert_eq!(pending.fail("t-1", Some("c-1"), "channel closed"), Some(Claimed::Waiter));
        assert_eq!(
            rx.await.unwrap(),
            Err(SdkError::PublishFailed {
                ticket_id: "t-1".to_string(),
                reason: "channel closed".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_claim_own_respects_generation() {
        let pending = PendingRequests::new();
        let (tx, _rx) = oneshot::channel();
        let generation = pending
            .register("t-1", "c-1", TicketType::Ticket, LONG, Some(tx))
            .unwrap();

        assert!(!pending.claim_own("t-1", generation + 1));
        assert!(pending.claim_own("t-1", generation));
        assert!(!pending.claim_own("t-1", generation));
    }

    #[tokio::test]
    async fn test_close_all_releases_waiters() {
        let pending = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        pending
            .register("t-1", "c-1", TicketType::Ticket, LONG, Some(tx))
            .unwrap();
        pending
            .register("t-2", "c-2", TicketType::Ticket, LONG, None)
            .unwrap();

        assert_eq!(pending.close_all(), 2);
        assert_eq!(rx.await.unwrap(), Err(SdkError::Closed));
        assert_eq!(pending.pending_count(), 0);
        assert!(pending.next_deadline().is_none());
    }

    #[tokio::test]
    async fn test_register_after_close_all_is_refused() {
        let pending = PendingRequests::new();
        pending.close_all();

        let (tx, rx) = oneshot::channel();
        assert_eq!(
            pending.register("t-1", "c-1", TicketType::Ticket, LONG, Some(tx)),
            Err(SdkError::Closed)
        );
        assert_eq!(
            pending.register("t-2", "c-2", TicketType::Ticket, LONG, None),
            Err(SdkError::Closed)
        );
        assert_eq!(pending.pending_count(), 0);
        assert_eq!(pending.deadline_count(), 0);
        // the refused waiter was dropped, not parked
        assert!(rx.await.is_err());
    }
}
