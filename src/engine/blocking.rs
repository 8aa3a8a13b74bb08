//! Blocking classification.
//!
//! `blockedReasons` is authoritative for `isBlocked`; the per-direction status
//! is derived from the blocked flags of the attached network events.

use serde::Serialize;

use crate::engine::events::NetworkEvent;
use crate::engine::store::CookieRecord;

/// Outcome across all events of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockStatus {
    NotBlocked,
    BlockedInSomeEvents,
    BlockedInAllEvents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingStatus {
    /// From request (cookie sent) events.
    pub inbound_block: BlockStatus,
    /// From response (cookie set) events.
    pub outbound_block: BlockStatus,
}

/// Evidence that disagrees with `blockedReasons`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contradiction {
    /// Reasons recorded but no event was blocked.
    ReasonsWithoutBlockedEvents,
    /// Some event was blocked but no reason was recorded.
    BlockedEventsWithoutReasons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: BlockingStatus,
    pub is_blocked: bool,
    /// Blocked and not allow-listed by an exemption.
    pub counts_as_blocked: bool,
    pub contradiction: Option<Contradiction>,
}

/// Three-way rule for one direction. No events is `NotBlocked`.
pub fn direction_status(events: &[NetworkEvent]) -> BlockStatus {
    let blocked = events.iter().filter(|e| e.blocked()).count();
    if blocked == 0 {
        BlockStatus::NotBlocked
    } else if blocked == events.len() {
        BlockStatus::BlockedInAllEvents
    } else {
        BlockStatus::BlockedInSomeEvents
    }
}

pub fn classify(record: &CookieRecord) -> Classification {
    let status = BlockingStatus {
        inbound_block: direction_status(&record.request_events),
        outbound_block: direction_status(&record.response_events),
    };
    let is_blocked = !record.blocked_reasons.is_empty();
    let any_blocked_event = record
        .request_events
        .iter()
        .chain(record.response_events.iter())
        .any(NetworkEvent::blocked);
    let has_events = !record.request_events.is_empty() || !record.response_events.is_empty();

    // A cookie only seen in a jar snapshot has no wire evidence to contradict.
    let contradiction = match (is_blocked, any_blocked_event) {
        (true, false) if has_events => Some(Contradiction::ReasonsWithoutBlockedEvents),
        (false, true) => Some(Contradiction::BlockedEventsWithoutReasons),
        _ => None,
    };

    Classification {
        status,
        is_blocked,
        counts_as_blocked: is_blocked && record.exemption.is_none(),
        contradiction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::{BlockedReason, ExemptionReason, RequestEvent, ResponseEvent};
    use crate::engine::store::{CookieIdentity, CookieStore, PartialCookie};

    fn request(blocked: bool) -> NetworkEvent {
        NetworkEvent::Request(RequestEvent {
            request_id: "1".into(),
            url: "https://a.test/".into(),
            blocked,
            time_stamp: 0.0,
            seq: 0,
        })
    }

    fn response(blocked: bool) -> NetworkEvent {
        NetworkEvent::Response(ResponseEvent {
            request_id: "1".into(),
            url: "https://a.test/".into(),
            blocked,
            time_stamp: 0.0,
            seq: 0,
        })
    }

    fn record_with(partials: Vec<PartialCookie>) -> CookieRecord {
        let mut store = CookieStore::new();
        let id = CookieIdentity::new("c", "a.test", "/");
        for partial in partials {
            store.upsert(id.clone(), partial);
        }
        store.into_records().remove(0)
    }

    #[test]
    fn test_direction_status() {
        assert_eq!(direction_status(&[]), BlockStatus::NotBlocked);
        assert_eq!(direction_status(&[request(false)]), BlockStatus::NotBlocked);
        assert_eq!(
            direction_status(&[request(true), request(false)]),
            BlockStatus::BlockedInSomeEvents
        );
        assert_eq!(
            direction_status(&[request(true), request(true)]),
            BlockStatus::BlockedInAllEvents
        );
    }

    #[test]
    fn test_status_serialization() {
        let status = BlockingStatus {
            inbound_block: BlockStatus::NotBlocked,
            outbound_block: BlockStatus::BlockedInAllEvents,
        };
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            serde_json::json!({
                "inboundBlock": "NOT_BLOCKED",
                "outboundBlock": "BLOCKED_IN_ALL_EVENTS"
            })
        );
    }

    #[test]
    fn test_exemption_keeps_is_blocked() {
        let record = record_with(vec![PartialCookie {
            event: Some(response(true)),
            blocked_reasons: vec![BlockedReason::ThirdPartyPhaseout],
            exemption: Some(ExemptionReason::TPCDMetadata),
            ..PartialCookie::default()
        }]);

        let c = classify(&record);
        assert!(c.is_blocked);
        assert!(!c.counts_as_blocked);
        assert_eq!(c.contradiction, None);
        assert_eq!(c.status.outbound_block, BlockStatus::BlockedInAllEvents);
        assert_eq!(c.status.inbound_block, BlockStatus::NotBlocked);
    }

    #[test]
    fn test_contradictions() {
        let reasons_only = record_with(vec![PartialCookie {
            event: Some(request(false)),
            blocked_reasons: vec![BlockedReason::DomainMismatch],
            ..PartialCookie::default()
        }]);
        assert_eq!(
            classify(&reasons_only).contradiction,
            Some(Contradiction::ReasonsWithoutBlockedEvents)
        );

        let events_only = record_with(vec![PartialCookie {
            event: Some(request(true)),
            ..PartialCookie::default()
        }]);
        let c = classify(&events_only);
        assert!(!c.is_blocked);
        assert_eq!(c.contradiction, Some(Contradiction::BlockedEventsWithoutReasons));
    }
}
