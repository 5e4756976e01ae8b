//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods       |
// |-------------------------|---------------------------------------------------|------------------|
// | TicketType              | Kind of outbound ticket                           | response_type    |
// | SdkTicket               | Any ticket the SDK can submit                     | to_json, is_live |
// | Ticket                  | New bet placement                                 | new, is_live     |
// | TicketCancel            | Cancellation of a placed ticket                   |                  |
// | TicketCashout           | Cashout request                                   |                  |
// | TicketNonSrSettle       | Settlement of a ticket not settled upstream       |                  |
// | TicketAck               | Client acknowledgment of a ticket response        |                  |
// | TicketCancelAck         | Client acknowledgment of a cancel response        |                  |
//--------------------------------------------------------------------------------------------------
//
// Tickets arrive pre-validated; this module only models and serializes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::response::ResponseType;

/// Wire format version stamped on tickets built with `new`
pub const TICKET_VERSION: &str = "2.4";

/// Selection id prefix marking live odds
const LIVE_SELECTION_PREFIX: &str = "lcoo:";

/// Kind of outbound ticket; each kind has its own sender and destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketType {
    Ticket,
    TicketCancel,
    TicketCashout,
    TicketNonSrSettle,
    TicketAck,
    TicketCancelAck,
}

impl TicketType {
    pub const ALL: [TicketType; 6] = [
        TicketType::Ticket,
        TicketType::TicketCancel,
        TicketType::TicketCashout,
        TicketType::TicketNonSrSettle,
        TicketType::TicketAck,
        TicketType::TicketCancelAck,
    ];

    /// Response type expected for this ticket kind; acknowledgments expect none
    pub fn response_type(&self) -> Option<ResponseType> {
        match self {
            TicketType::Ticket => Some(ResponseType::Ticket),
            TicketType::TicketCancel => Some(ResponseType::TicketCancel),
            TicketType::TicketCashout => Some(ResponseType::TicketCashout),
            TicketType::TicketNonSrSettle => Some(ResponseType::TicketNonSrSettle),
            TicketType::TicketAck | TicketType::TicketCancelAck => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketType::Ticket => "ticket",
            TicketType::TicketCancel => "ticket_cancel",
            TicketType::TicketCashout => "ticket_cashout",
            TicketType::TicketNonSrSettle => "ticket_non_sr_settle",
            TicketType::TicketAck => "ticket_ack",
            TicketType::TicketCancelAck => "ticket_cancel_ack",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel through which the end customer placed the ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderChannel {
    Internet,
    Retail,
    Terminal,
    Mobile,
    Phone,
    Sms,
    CallCentre,
    TvApp,
    Agent,
}

/// Optional end customer details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCustomer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Stake confidence factor, scaled by 10_000
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u64>,
}

/// Identity of the bookmaker submitting a placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    pub bookmaker_id: u32,
    pub currency: String,
    pub channel: SenderChannel,
    pub limit_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shop_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_customer: Option<EndCustomer>,
}

/// A single selection (market outcome) on a placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub event_id: String,
    pub id: String,
    /// Decimal odds scaled by 10_000
    pub odds: u32,
    #[serde(default)]
    pub is_banker: bool,
}

impl Selection {
    /// Live selections carry the live-odds prefix on their id
    pub fn is_live(&self) -> bool {
        self.id
            .get(..LIVE_SELECTION_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(LIVE_SELECTION_PREFIX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeType {
    Total,
    Unit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    /// Amount in currency units scaled by 10_000
    pub value: u64,
    #[serde(rename = "type")]
    pub stake_type: StakeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRef {
    pub selection_index: u32,
    #[serde(default)]
    pub banker: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub id: String,
    pub stake: Stake,
    pub selection_refs: Vec<SelectionRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_systems: Vec<u32>,
}

/// How the backend may treat odds changes between submission and acceptance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsChangeType {
    None,
    Any,
    Higher,
}

/// New bet placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp_utc: DateTime<Utc>,
    pub version: String,
    pub sender: SenderInfo,
    pub selections: Vec<Selection>,
    pub bets: Vec<Bet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reoffer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_stake_ref_id: Option<String>,
    #[serde(default)]
    pub test_source: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub odds_change: Option<OddsChangeType>,
}

impl Ticket {
    /// Creates a placement stamped with the current time and wire version
    pub fn new(
        ticket_id: impl Into<String>,
        sender: SenderInfo,
        selections: Vec<Selection>,
        bets: Vec<Bet>,
    ) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            timestamp_utc: Utc::now(),
            version: TICKET_VERSION.to_string(),
            sender,
            selections,
            bets,
            reoffer_id: None,
            alt_stake_ref_id: None,
            test_source: false,
            odds_change: None,
        }
    }

    /// A placement is live as soon as one of its selections is live
    pub fn is_live(&self) -> bool {
        self.selections.iter().any(Selection::is_live)
    }
}

/// Per-bet cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetCancel {
    pub bet_id: String,
    /// Percentage scaled by 10_000
    pub cancel_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketCancel {
    pub ticket_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp_utc: DateTime<Utc>,
    pub version: String,
    /// Cancellation reason code
    pub code: u32,
    pub bookmaker_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_percent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bet_cancel: Option<Vec<BetCancel>>,
}

impl TicketCancel {
    pub fn new(ticket_id: impl Into<String>, bookmaker_id: u32, code: u32) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            timestamp_utc: Utc::now(),
            version: TICKET_VERSION.to_string(),
            code,
            bookmaker_id,
            cancel_percent: None,
            bet_cancel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketCashout {
    pub ticket_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp_utc: DateTime<Utc>,
    pub version: String,
    pub bookmaker_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cashout_stake: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cashout_percent: Option<u32>,
}

impl TicketCashout {
    pub fn new(ticket_id: impl Into<String>, bookmaker_id: u32, cashout_stake: u64) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            timestamp_utc: Utc::now(),
            version: TICKET_VERSION.to_string(),
            bookmaker_id,
            cashout_stake: Some(cashout_stake),
            cashout_percent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketNonSrSettle {
    pub ticket_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp_utc: DateTime<Utc>,
    pub version: String,
    pub bookmaker_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_sr_settle_stake: Option<u64>,
}

impl TicketNonSrSettle {
    pub fn new(ticket_id: impl Into<String>, bookmaker_id: u32, stake: Option<u64>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            timestamp_utc: Utc::now(),
            version: TICKET_VERSION.to_string(),
            bookmaker_id,
            non_sr_settle_stake: stake,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketAckStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketAck {
    pub ticket_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp_utc: DateTime<Utc>,
    pub version: String,
    pub bookmaker_id: u32,
    pub ticket_status: TicketAckStatus,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketCancelAckStatus {
    Cancelled,
    NotCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketCancelAck {
    pub ticket_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp_utc: DateTime<Utc>,
    pub version: String,
    pub bookmaker_id: u32,
    pub ticket_cancel_status: TicketCancelAckStatus,
    pub code: i32,
    pub message: String,
}

/// Any ticket the SDK can submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkTicket {
    Ticket(Ticket),
    TicketCancel(TicketCancel),
    TicketCashout(TicketCashout),
    TicketNonSrSettle(TicketNonSrSettle),
    TicketAck(TicketAck),
    TicketCancelAck(TicketCancelAck),
}

impl SdkTicket {
    pub fn ticket_id(&self) -> &str {
        match self {
            SdkTicket::Ticket(t) => &t.ticket_id,
            SdkTicket::TicketCancel(t) => &t.ticket_id,
            SdkTicket::TicketCashout(t) => &t.ticket_id,
            SdkTicket::TicketNonSrSettle(t) => &t.ticket_id,
            SdkTicket::TicketAck(t) => &t.ticket_id,
            SdkTicket::TicketCancelAck(t) => &t.ticket_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SdkTicket::Ticket(t) => t.timestamp_utc,
            SdkTicket::TicketCancel(t) => t.timestamp_utc,
            SdkTicket::TicketCashout(t) => t.timestamp_utc,
            SdkTicket::TicketNonSrSettle(t) => t.timestamp_utc,
            SdkTicket::TicketAck(t) => t.timestamp_utc,
            SdkTicket::TicketCancelAck(t) => t.timestamp_utc,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            SdkTicket::Ticket(t) => &t.version,
            SdkTicket::TicketCancel(t) => &t.version,
            SdkTicket::TicketCashout(t) => &t.version,
            SdkTicket::TicketNonSrSettle(t) => &t.version,
            SdkTicket::TicketAck(t) => &t.version,
            SdkTicket::TicketCancelAck(t) => &t.version,
        }
    }

    pub fn ticket_type(&self) -> TicketType {
        match self {
            SdkTicket::Ticket(_) => TicketType::Ticket,
            SdkTicket::TicketCancel(_) => TicketType::TicketCancel,
            SdkTicket::TicketCashout(_) => TicketType::TicketCashout,
            SdkTicket::TicketNonSrSettle(_) => TicketType::TicketNonSrSettle,
            SdkTicket::TicketAck(_) => TicketType::TicketAck,
            SdkTicket::TicketCancelAck(_) => TicketType::TicketCancelAck,
        }
    }

    /// Bookmaker that submitted the ticket
    pub fn bookmaker_id(&self) -> u32 {
        match self {
            SdkTicket::Ticket(t) => t.sender.bookmaker_id,
            SdkTicket::TicketCancel(t) => t.bookmaker_id,
            SdkTicket::TicketCashout(t) => t.bookmaker_id,
            SdkTicket::TicketNonSrSettle(t) => t.bookmaker_id,
            SdkTicket::TicketAck(t) => t.bookmaker_id,
            SdkTicket::TicketCancelAck(t) => t.bookmaker_id,
        }
    }

    /// Only placements can be live
    pub fn is_live(&self) -> bool {
        match self {
            SdkTicket::Ticket(t) => t.is_live(),
            _ => false,
        }
    }

    /// Serializes the ticket body as published on the wire
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            SdkTicket::Ticket(t) => serde_json::to_vec(t),
            SdkTicket::TicketCancel(t) => serde_json::to_vec(t),
            SdkTicket::TicketCashout(t) => serde_json::to_vec(t),
            SdkTicket::TicketNonSrSettle(t) => serde_json::to_vec(t),
            SdkTicket::TicketAck(t) => serde_json::to_vec(t),
            SdkTicket::TicketCancelAck(t) => serde_json::to_vec(t),
        }
    }
}

impl From<Ticket> for SdkTicket {
    fn from(ticket: Ticket) -> Self {
        SdkTicket::Ticket(ticket)
    }
}

impl From<TicketCancel> for SdkTicket {
    fn from(ticket: TicketCancel) -> Self {
        SdkTicket::TicketCancel(ticket)
    }
}

impl From<TicketCashout> for SdkTicket {
    fn from(ticket: TicketCashout) -> Self {
        SdkTicket::TicketCashout(ticket)
    }
}

impl From<TicketNonSrSettle> for SdkTicket {
    fn from(ticket: TicketNonSrSettle) -> Self {
        SdkTicket::TicketNonSrSettle(ticket)
    }
}

impl From<TicketAck> for SdkTicket {
    fn from(ticket: TicketAck) -> Self {
        SdkTicket::TicketAck(ticket)
    }
}

impl From<TicketCancelAck> for SdkTicket {
    fn from(ticket: TicketCancelAck) -> Self {
        SdkTicket::TicketCancelAck(ticket)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn create_test_ticket(ticket_id: &str, selection_id: &str) -> Ticket {
        Ticket::new(
            ticket_id,
            SenderInfo {
                bookmaker_id: 7_669,
                currency: "EUR".to_string(),
                channel: SenderChannel::Internet,
                limit_id: 424,
                terminal_id: None,
                shop_id: None,
                end_customer: None,
            },
            vec![Selection {
                event_id: "sr:match:11111".to_string(),
                id: selection_id.to_string(),
                odds: 12_000,
                is_banker: false,
            }],
            vec![Bet {
                id: format!("{}-bet", ticket_id),
                stake: Stake {
                    value: 10_000,
                    stake_type: StakeType::Total,
                },
                selection_refs: vec![SelectionRef {
                    selection_index: 0,
                    banker: false,
                }],
                selected_systems: vec![],
            }],
        )
    }

    #[test]
    fn test_live_detection() {
        let prematch = create_test_ticket("t-1", "uof:1/sr:match:11111/1/1");
        let live = create_test_ticket("t-2", "LCOO:409/1/*/1");

        assert!(!prematch.is_live());
        assert!(live.is_live());
        assert!(SdkTicket::from(live).is_live());
        assert!(!SdkTicket::from(TicketCancel::new("t-2", 1, 101)).is_live());
    }

    #[test]
    fn test_placement_serializes_camel_case() {
        let ticket = create_test_ticket("t-1", "uof:1/sr:match:11111/1/1");
        let json: serde_json::Value =
            serde_json::from_slice(&SdkTicket::from(ticket.clone()).to_json().unwrap()).unwrap();

        assert_eq!(json["ticketId"], "t-1");
        assert_eq!(json["version"], TICKET_VERSION);
        assert_eq!(json["sender"]["bookmakerId"], 7_669);
        assert_eq!(json["sender"]["channel"], "internet");
        assert_eq!(json["bets"][0]["stake"]["type"], "total");
        assert_eq!(
            json["timestampUtc"].as_i64(),
            Some(ticket.timestamp_utc.timestamp_millis())
        );
        assert!(json.get("reofferId").is_none());
    }

    #[test]
    fn test_ticket_type_response_mapping() {
        assert_eq!(TicketType::Ticket.response_type(), Some(ResponseType::Ticket));
        assert_eq!(
            TicketType::TicketCancel.response_type(),
            Some(ResponseType::TicketCancel)
        );
        assert_eq!(TicketType::TicketAck.response_type(), None);
        assert_eq!(TicketType::TicketCancelAck.response_type(), None);
    }
}
