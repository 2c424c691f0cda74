//! Per-record enrichment with bounded concurrency and bisection retry.
//!
//! Each filtered record is reshaped into a [`ScoringRequest`] (event metadata
//! plus order data), handed to a [`Scorer`], and the result is attached as an
//! [`EnrichmentOutcome`]. Failures are isolated per record and resolved by the
//! [`BisectRetrier`].

mod bisect;
mod invoker;
mod scorer;

pub use bisect::{BatchOutcome, BisectRetrier};
pub use invoker::EnrichmentInvoker;
pub use scorer::{RandomScorer, Scorer};

use crate::record::ChangeRecord;
use crate::EnrichmentError;
use serde::{Deserialize, Serialize};

/// Lowest score a scorer may return.
pub const MIN_SCORE: i64 = 1;
/// Highest score a scorer may return.
pub const MAX_SCORE: i64 = 100;

/// Stream metadata carried into the published event.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    /// Stream event identifier
    #[serde(rename = "eventID")]
    pub event_id: String,
    /// INSERT, MODIFY or REMOVE
    pub event_name: String,
    /// Approximate creation time (seconds since epoch)
    pub approx_date_time: i64,
}

/// Order fields extracted from the record's new image.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderData {
    /// Order number (`PK`)
    pub order_number: String,
    /// Customer name (`name`)
    pub customer_name: String,
    /// Order value (`value`, parsed)
    pub order_value: f64,
}

/// Input handed to a scorer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringRequest {
    /// Stream metadata
    pub event_data: EventData,
    /// Order fields
    pub order_data: OrderData,
}

impl ScoringRequest {
    /// Reshape a change record into a scoring request.
    pub fn from_record(record: &ChangeRecord) -> Result<Self, EnrichmentError> {
        let rejected = |message: &str| EnrichmentError::Rejected {
            sequence_id: record.sequence_id.to_string(),
            message: message.to_string(),
        };

        let order_number = record
            .string_field("PK")
            .ok_or_else(|| rejected("PK is not a string"))?;
        let customer_name = record
            .string_field("name")
            .ok_or_else(|| rejected("name is not a string"))?;
        let order_value = record
            .number_field("value")
            .ok_or_else(|| rejected("value is not a number"))?;

        Ok(Self {
            event_data: EventData {
                event_id: record.event_id.clone(),
                event_name: record.event_kind.to_string(),
                approx_date_time: record.approx_creation_time,
            },
            order_data: OrderData {
                order_number: order_number.to_string(),
                customer_name: customer_name.to_string(),
                order_value,
            },
        })
    }
}

/// Per-record enrichment result.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    /// Scored, score in [1, 100]
    Scored { score: u8 },
    /// Scoring failed or timed out
    Failed { error: EnrichmentError },
}

impl EnrichmentOutcome {
    /// Whether the record was scored.
    pub fn is_success(&self) -> bool {
        matches!(self, EnrichmentOutcome::Scored { .. })
    }

    /// The score, if scored.
    pub fn score(&self) -> Option<u8> {
        match self {
            EnrichmentOutcome::Scored { score } => Some(*score),
            EnrichmentOutcome::Failed { .. } => None,
        }
    }
}

/// A change record with its enrichment outcome attached.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    /// The source record
    pub record: ChangeRecord,
    /// Its outcome
    pub outcome: EnrichmentOutcome,
}

impl EnrichedRecord {
    /// Attach an outcome to a record.
    pub fn new(record: ChangeRecord, outcome: EnrichmentOutcome) -> Self {
        Self { record, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AttributeValue, EventKind};
    use std::collections::BTreeMap;

    #[test]
    fn test_scoring_request_from_record() {
        let mut fields = BTreeMap::new();
        fields.insert("PK".to_string(), AttributeValue::S("1000".into()));
        fields.insert("name".to_string(), AttributeValue::S("Ayla Smith".into()));
        fields.insert("value".to_string(), AttributeValue::N("19.99".into()));
        let record = ChangeRecord::new("evt-1", EventKind::Insert, fields, 1672531200);

        let request = ScoringRequest::from_record(&record).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["eventData"]["eventID"], "evt-1");
        assert_eq!(json["eventData"]["eventName"], "INSERT");
        assert_eq!(json["eventData"]["approxDateTime"], 1672531200);
        assert_eq!(json["orderData"]["orderNumber"], "1000");
        assert_eq!(json["orderData"]["customerName"], "Ayla Smith");
        assert_eq!(json["orderData"]["orderValue"], 19.99);
    }

    #[test]
    fn test_scoring_request_rejects_unparseable_value() {
        let mut fields = BTreeMap::new();
        fields.insert("PK".to_string(), AttributeValue::S("1".into()));
        fields.insert("name".to_string(), AttributeValue::S("x".into()));
        fields.insert("value".to_string(), AttributeValue::N("twelve".into()));
        let record = ChangeRecord::new("evt-1", EventKind::Insert, fields, 0);

        let err = ScoringRequest::from_record(&record).unwrap_err();
        assert!(matches!(err, EnrichmentError::Rejected { .. }));
    }

    #[test]
    fn test_outcome_accessors() {
        assert_eq!(EnrichmentOutcome::Scored { score: 95 }.score(), Some(95));
        let failed = EnrichmentOutcome::Failed {
            error: EnrichmentError::Scoring("boom".into()),
        };
        assert!(!failed.is_success());
        assert_eq!(failed.score(), None);
    }
}
