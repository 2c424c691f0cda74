//! Enriched events published on the bus.

use crate::enrichment::{EventData, OrderData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of the fraud check.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudChecks {
    /// Score in [1, 100]
    pub fraud_score: u8,
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    /// Stream metadata
    pub event_data: EventData,
    /// Order fields
    pub order_data: OrderData,
    /// Enrichment result
    pub fraud_checks: FraudChecks,
}

/// An event published once per successfully enriched record. Immutable.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEvent {
    /// Event identifier, stable across publish retries
    pub id: String,
    /// Source tag
    pub source: String,
    /// Detail type
    pub detail_type: String,
    /// Publish time
    pub time: DateTime<Utc>,
    /// Payload
    pub detail: EventDetail,
}

impl EnrichedEvent {
    /// JSON view of the detail, as seen by routing predicates.
    pub fn detail_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.detail).unwrap_or(serde_json::Value::Null)
    }

    /// Fraud score of the event.
    pub fn fraud_score(&self) -> u8 {
        self.detail.fraud_checks.fraud_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = EnrichedEvent {
            id: "e-1".into(),
            source: "fraudcheck.orderpipe".into(),
            detail_type: "fraudcheck.rating".into(),
            time: Utc::now(),
            detail: EventDetail {
                event_data: EventData {
                    event_id: "evt-1".into(),
                    event_name: "INSERT".into(),
                    approx_date_time: 1672531200,
                },
                order_data: OrderData {
                    order_number: "1000".into(),
                    customer_name: "Ayla".into(),
                    order_value: 12.5,
                },
                fraud_checks: FraudChecks { fraud_score: 95 },
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["source"], "fraudcheck.orderpipe");
        assert_eq!(json["detailType"], "fraudcheck.rating");
        assert_eq!(json["detail"]["fraudChecks"]["fraudScore"], 95);
        assert_eq!(json["detail"]["orderData"]["orderNumber"], "1000");
        assert_eq!(event.detail_value()["eventData"]["eventID"], "evt-1");

        let back: EnrichedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
