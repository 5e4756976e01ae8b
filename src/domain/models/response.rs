//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name                      | Description                                     | Key Methods       |
// |---------------------------|-------------------------------------------------|------------------|
// | ResponseType              | Kind of inbound response / reply channel        | routing_suffix   |
// | SdkResponse               | Any parsed response                             | parse, build_ack |
// | TicketResponse            | Outcome of a placement                          |                  |
// | TicketCancelResponse      | Outcome of a cancellation                       |                  |
// | TicketCashoutResponse     | Outcome of a cashout                            |                  |
// | TicketNonSrSettleResponse | Outcome of a non-settled ticket settlement      |                  |
// | UnparsableMessage         | Inbound body that matched no response shape     | from_inbound     |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;

use crate::error::SdkError;

use super::ticket::{
    SdkTicket, TICKET_VERSION, TicketAck, TicketAckStatus, TicketCancelAck,
    TicketCancelAckStatus,
};

/// Kind of inbound response; each kind is consumed on its own channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    Ticket,
    TicketCancel,
    TicketCashout,
    TicketNonSrSettle,
}

impl ResponseType {
    pub const ALL: [ResponseType; 4] = [
        ResponseType::Ticket,
        ResponseType::TicketCancel,
        ResponseType::TicketCashout,
        ResponseType::TicketNonSrSettle,
    ];

    /// Routing key suffix on the reply exchange; the full key is `node{id}.{suffix}`
    pub fn routing_suffix(&self) -> &'static str {
        match self {
            ResponseType::Ticket => "ticket.confirm",
            ResponseType::TicketCancel => "cancel.confirm",
            ResponseType::TicketCashout => "ticket.cashout",
            ResponseType::TicketNonSrSettle => "ticket.nonsrsettle",
        }
    }

    pub fn routing_key(&self, node_id: u32) -> String {
        format!("node{}.{}", node_id, self.routing_suffix())
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseType::Ticket => "ticket_response",
            ResponseType::TicketCancel => "ticket_cancel_response",
            ResponseType::TicketCashout => "ticket_cashout_response",
            ResponseType::TicketNonSrSettle => "ticket_non_sr_settle_response",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseReason {
    pub code: i32,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetDetail {
    pub bet_id: String,
    #[serde(default)]
    pub reason: Option<ResponseReason>,
}

/// Acceptance status of placements, cashouts and non-settled settlements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketAcceptance {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketCancelStatus {
    Cancelled,
    NotCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketResponse {
    pub ticket_id: String,
    pub status: TicketAcceptance,
    pub reason: ResponseReason,
    pub bet_details: Vec<BetDetail>,
    pub exchange_rate: Option<u64>,
    pub signature: String,
    pub version: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub raw_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketCancelResponse {
    pub ticket_id: String,
    pub status: TicketCancelStatus,
    pub reason: ResponseReason,
    pub signature: String,
    pub version: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub raw_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketCashoutResponse {
    pub ticket_id: String,
    pub status: TicketAcceptance,
    pub reason: ResponseReason,
    pub signature: String,
    pub version: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub raw_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketNonSrSettleResponse {
    pub ticket_id: String,
    pub status: TicketAcceptance,
    pub reason: ResponseReason,
    pub signature: String,
    pub version: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub raw_json: String,
}

/// Any response the SDK can receive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SdkResponse {
    Ticket(TicketResponse),
    TicketCancel(TicketCancelResponse),
    TicketCashout(TicketCashoutResponse),
    TicketNonSrSettle(TicketNonSrSettleResponse),
}

// Wire shape shared by all responses
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseEnvelope<S> {
    result: ResultBody<S>,
    #[serde(default)]
    signature: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    exchange_rate: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultBody<S> {
    ticket_id: String,
    status: S,
    reason: ResponseReason,
    #[serde(default)]
    bet_details: Vec<BetDetail>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    timestamp_utc: Option<DateTime<Utc>>,
}

impl<S> ResponseEnvelope<S> {
    fn timestamp(&self) -> DateTime<Utc> {
        self.result.timestamp_utc.unwrap_or_else(Utc::now)
    }

    fn version(&self) -> String {
        self.version.clone().unwrap_or_else(|| TICKET_VERSION.to_string())
    }
}

fn envelope<S: DeserializeOwned>(
    response_type: ResponseType,
    body: &[u8],
) -> Result<ResponseEnvelope<S>, SdkError> {
    serde_json::from_slice(body).map_err(|e| SdkError::DeserializationFailed {
        response_type,
        reason: e.to_string(),
    })
}

impl SdkResponse {
    /// Parses `body` as the shape declared by `response_type`
    ///
    /// # Arguments
    /// * `response_type` - Declared type of the channel the body arrived on
    /// * `body` - Raw JSON payload
    /// * `correlation_id` - Correlation id carried by the transport, if any
    ///
    /// # Errors
    /// `SdkError::DeserializationFailed` if the body does not have the declared shape
    pub fn parse(
        response_type: ResponseType,
        body: &[u8],
        correlation_id: Option<&str>,
    ) -> Result<SdkResponse, SdkError> {
        let raw_json = String::from_utf8_lossy(body).into_owned();
        let correlation_id = correlation_id.map(str::to_owned);

        let response = match response_type {
            ResponseType::Ticket => {
                let env = envelope::<TicketAcceptance>(response_type, body)?;
                let (timestamp, version) = (env.timestamp(), env.version());
                SdkResponse::Ticket(TicketResponse {
                    ticket_id: env.result.ticket_id,
                    status: env.result.status,
                    reason: env.result.reason,
                    bet_details: env.result.bet_details,
                    exchange_rate: env.exchange_rate,
                    signature: env.signature,
                    version,
                    correlation_id,
                    timestamp,
                    raw_json,
                })
            }
            ResponseType::TicketCancel => {
                let env = envelope::<TicketCancelStatus>(response_type, body)?;
                let (timestamp, version) = (env.timestamp(), env.version());
                SdkResponse::TicketCancel(TicketCancelResponse {
                    ticket_id: env.result.ticket_id,
                    status: env.result.status,
                    reason: env.result.reason,
                    signature: env.signature,
                    version,
                    correlation_id,
                    timestamp,
                    raw_json,
                })
            }
            ResponseType::TicketCashout => {
                let env = envelope::<TicketAcceptance>(response_type, body)?;
                let (timestamp, version) = (env.timestamp(), env.version());
                SdkResponse::TicketCashout(TicketCashoutResponse {
                    ticket_id: env.result.ticket_id,
                    status: env.result.status,
                    reason: env.result.reason,
                    signature: env.signature,
                    version,
                    correlation_id,
                    timestamp,
                    raw_json,
                })
            }
            ResponseType::TicketNonSrSettle => {
                let env = envelope::<TicketAcceptance>(response_type, body)?;
                let (timestamp, version) = (env.timestamp(), env.version());
                SdkResponse::TicketNonSrSettle(TicketNonSrSettleResponse {
                    ticket_id: env.result.ticket_id,
                    status: env.result.status,
                    reason: env.result.reason,
                    signature: env.signature,
                    version,
                    correlation_id,
                    timestamp,
                    raw_json,
                })
            }
        };

        Ok(response)
    }

    pub fn response_type(&self) -> ResponseType {
        match self {
            SdkResponse::Ticket(_) => ResponseType::Ticket,
            SdkResponse::TicketCancel(_) => ResponseType::TicketCancel,
            SdkResponse::TicketCashout(_) => ResponseType::TicketCashout,
            SdkResponse::TicketNonSrSettle(_) => ResponseType::TicketNonSrSettle,
        }
    }

    pub fn ticket_id(&self) -> &str {
        match self {
            SdkResponse::Ticket(r) => &r.ticket_id,
            SdkResponse::TicketCancel(r) => &r.ticket_id,
            SdkResponse::TicketCashout(r) => &r.ticket_id,
            SdkResponse::TicketNonSrSettle(r) => &r.ticket_id,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            SdkResponse::Ticket(r) => r.correlation_id.as_deref(),
            SdkResponse::TicketCancel(r) => r.correlation_id.as_deref(),
            SdkResponse::TicketCashout(r) => r.correlation_id.as_deref(),
            SdkResponse::TicketNonSrSettle(r) => r.correlation_id.as_deref(),
        }
    }

    pub fn reason(&self) -> &ResponseReason {
        match self {
            SdkResponse::Ticket(r) => &r.reason,
            SdkResponse::TicketCancel(r) => &r.reason,
            SdkResponse::TicketCashout(r) => &r.reason,
            SdkResponse::TicketNonSrSettle(r) => &r.reason,
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            SdkResponse::Ticket(r) => &r.signature,
            SdkResponse::TicketCancel(r) => &r.signature,
            SdkResponse::TicketCashout(r) => &r.signature,
            SdkResponse::TicketNonSrSettle(r) => &r.signature,
        }
    }

    /// Builds the acknowledgment for this response
    ///
    /// `mark_accepted` only confirms what the backend decided: a rejected ticket is
    /// always acknowledged as rejected.
    ///
    /// # Returns
    /// The ack ticket, or None for response types that are never acknowledged
    pub fn build_ack(&self, bookmaker_id: u32, mark_accepted: bool) -> Option<SdkTicket> {
        let reason = self.reason();
        let message = reason.message.clone().unwrap_or_default();

        match self {
            SdkResponse::Ticket(r) => {
                let ticket_status = if mark_accepted && r.status == TicketAcceptance::Accepted {
                    TicketAckStatus::Accepted
                } else {
                    TicketAckStatus::Rejected
                };
                Some(SdkTicket::TicketAck(TicketAck {
                    ticket_id: r.ticket_id.clone(),
                    timestamp_utc: Utc::now(),
                    version: r.version.clone(),
                    bookmaker_id,
                    ticket_status,
                    code: reason.code,
                    message,
                }))
            }
            SdkResponse::TicketCancel(r) => {
                let ticket_cancel_status =
                    if mark_accepted && r.status == TicketCancelStatus::Cancelled {
                        TicketCancelAckStatus::Cancelled
                    } else {
                        TicketCancelAckStatus::NotCancelled
                    };
                Some(SdkTicket::TicketCancelAck(TicketCancelAck {
                    ticket_id: r.ticket_id.clone(),
                    timestamp_utc: Utc::now(),
                    version: r.version.clone(),
                    bookmaker_id,
                    ticket_cancel_status,
                    code: reason.code,
                    message,
                }))
            }
            SdkResponse::TicketCashout(_) | SdkResponse::TicketNonSrSettle(_) => None,
        }
    }
}

/// Inbound message whose body could not be parsed as its declared response type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnparsableMessage {
    pub response_type: ResponseType,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    /// Best-effort ticket id found in the body
    pub ticket_id: Option<String>,
    pub body: String,
    pub error: String,
}

impl UnparsableMessage {
    pub fn new(
        response_type: ResponseType,
        routing_key: &str,
        correlation_id: Option<&str>,
        body: &[u8],
        error: impl fmt::Display,
    ) -> Self {
        Self {
            response_type,
            routing_key: routing_key.to_owned(),
            correlation_id: correlation_id.map(str::to_owned),
            ticket_id: extract_ticket_id(body),
            body: String::from_utf8_lossy(body).into_owned(),
            error: error.to_string(),
        }
    }
}

/// Looks for `result.ticketId` or a top-level `ticketId` in any JSON body
pub fn extract_ticket_id(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;

    value
        .pointer("/result/ticketId")
        .or_else(|| value.get("ticketId"))
        .and_then(|id| id.as_str())
        .map(str::to_owned)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn ticket_response_json(ticket_id: &str, status: &str) -> Vec<u8> {
        format!(
            r#"{{"result":{{"ticketId":"{}","status":"{}","reason":{{"code":1024,"message":"Ticket accepted"}},"betDetails":[]}},"signature":"sig-1","exchangeRate":10000,"version":"2.4"}}"#,
            ticket_id, status
        )
        .into_bytes()
    }

    pub(crate) fn cancel_response_json(ticket_id: &str, status: &str) -> Vec<u8> {
        format!(
            r#"{{"result":{{"ticketId":"{}","status":"{}","reason":{{"code":1024}}}},"signature":"sig-2","version":"2.4"}}"#,
            ticket_id, status
        )
        .into_bytes()
    }

    #[test]
    fn test_parse_ticket_response() {
        let response = SdkResponse::parse(
            ResponseType::Ticket,
            &ticket_response_json("t-1", "accepted"),
            Some("corr-1"),
        )
        .unwrap();

        match response {
            SdkResponse::Ticket(r) => {
                assert_eq!(r.ticket_id, "t-1");
                assert_eq!(r.status, TicketAcceptance::Accepted);
                assert_eq!(r.reason.code, 1024);
                assert_eq!(r.exchange_rate, Some(10_000));
                assert_eq!(r.signature, "sig-1");
                assert_eq!(r.correlation_id.as_deref(), Some("corr-1"));
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_parse_cancel_response() {
        let response = SdkResponse::parse(
            ResponseType::TicketCancel,
            &cancel_response_json("t-1", "not_cancelled"),
            None,
        )
        .unwrap();

        assert_eq!(response.response_type(), ResponseType::TicketCancel);
        assert_eq!(response.ticket_id(), "t-1");
        assert_eq!(response.correlation_id(), None);
        assert!(matches!(
            response,
            SdkResponse::TicketCancel(TicketCancelResponse {
                status: TicketCancelStatus::NotCancelled,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        // A cancel status is not a valid placement status
        let result = SdkResponse::parse(
            ResponseType::Ticket,
            &cancel_response_json("t-1", "cancelled"),
            None,
        );
        match result {
            Err(SdkError::DeserializationFailed {
                response_type,
                reason,
            }) => {
                assert_eq!(response_type, ResponseType::Ticket);
                assert!(reason.contains("cancelled"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_extract_ticket_id() {
        assert_eq!(
            extract_ticket_id(br#"{"result":{"ticketId":"t-9","status":"??"}}"#),
            Some("t-9".to_string())
        );
        assert_eq!(
            extract_ticket_id(br#"{"ticketId":"t-8"}"#),
            Some("t-8".to_string())
        );
        assert_eq!(extract_ticket_id(b"not json"), None);
    }

    #[test]
    fn test_unparsable_message_keeps_context() {
        let msg = UnparsableMessage::new(
            ResponseType::TicketCashout,
            "node1.ticket.cashout",
            Some("corr-7"),
            br#"{"result":{"ticketId":"t-7"}}"#,
            "missing field `status`",
        );

        assert_eq!(msg.ticket_id.as_deref(), Some("t-7"));
        assert_eq!(msg.correlation_id.as_deref(), Some("corr-7"));
        assert_eq!(msg.routing_key, "node1.ticket.cashout");
        assert!(msg.error.contains("status"));
    }

    #[test]
    fn test_build_ack_mirrors_rejection() {
        let rejected = SdkResponse::parse(
            ResponseType::Ticket,
            &ticket_response_json("t-1", "rejected"),
            None,
        )
        .unwrap();

        match rejected.build_ack(42, true) {
            Some(SdkTicket::TicketAck(ack)) => {
                assert_eq!(ack.ticket_status, TicketAckStatus::Rejected);
                assert_eq!(ack.bookmaker_id, 42);
                assert_eq!(ack.code, 1024);
            }
            other => panic!("unexpected ack {:?}", other),
        }
    }

    #[test]
    fn test_cashout_has_no_ack() {
        let cashout = SdkResponse::parse(
            ResponseType::TicketCashout,
            &ticket_response_json("t-1", "accepted"),
            None,
        )
        .unwrap();
        assert!(cashout.build_ack(42, true).is_none());
    }

    #[test]
    fn test_response_type_routing_keys() {
        assert_eq!(ResponseType::Ticket.routing_key(3), "node3.ticket.confirm");
        assert_eq!(
            ResponseType::TicketNonSrSettle.routing_key(1),
            "node1.ticket.nonsrsettle"
        );
    }
}
