//! Structural filter over change records.
//!
//! A record passes when its event kind is accepted and every required field is
//! present in the new image with the expected primitive type. Filtering is not
//! a failure: records that do not match are dropped silently by the pipeline.

use crate::config::{FilterConfig, RequiredField};
use crate::record::{AttributeType, ChangeRecord, EventKind};
use std::fmt;

/// Why a record did not pass the filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterMismatch {
    /// Event kind is not accepted
    EventKind(EventKind),
    /// A required field is absent
    MissingField(String),
    /// A required field has another primitive type
    WrongType {
        field: String,
        expected: AttributeType,
        actual: AttributeType,
    },
}

impl fmt::Display for FilterMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMismatch::EventKind(kind) => write!(f, "event kind {} not accepted", kind),
            FilterMismatch::MissingField(field) => write!(f, "missing field {}", field),
            FilterMismatch::WrongType {
                field,
                expected,
                actual,
            } => write!(
                f,
                "field {} has type {:?}, expected {:?}",
                field, actual, expected
            ),
        }
    }
}

/// Pure predicate over a change record's shape.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    event_kinds: Vec<EventKind>,
    required_fields: Vec<RequiredField>,
}

impl FilterEngine {
    /// Create a filter from configuration.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            event_kinds: config.event_kinds.clone(),
            required_fields: config.required_fields.clone(),
        }
    }

    /// Whether the record passes the filter.
    pub fn matches(&self, record: &ChangeRecord) -> bool {
        self.check(record).is_ok()
    }

    /// Check a record, reporting the first mismatch.
    pub fn check(&self, record: &ChangeRecord) -> Result<(), FilterMismatch> {
        if !self.event_kinds.contains(&record.event_kind) {
            return Err(FilterMismatch::EventKind(record.event_kind));
        }

        for required in &self.required_fields {
            let value = record
                .field(&required.name)
                .ok_or_else(|| FilterMismatch::MissingField(required.name.clone()))?;

            let actual = value.attribute_type();
            if actual != required.attribute_type {
                return Err(FilterMismatch::WrongType {
                    field: required.name.clone(),
                    expected: required.attribute_type,
                    actual,
                });
            }
        }

        Ok(())
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AttributeValue;
    use std::collections::BTreeMap;

    fn order(kind: EventKind, fields: &[(&str, AttributeValue)]) -> ChangeRecord {
        let fields: BTreeMap<_, _> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        ChangeRecord::new("evt", kind, fields, 0)
    }

    fn full_fields() -> Vec<(&'static str, AttributeValue)> {
        vec![
            ("PK", AttributeValue::S("1000".into())),
            ("name", AttributeValue::S("Ayla".into())),
            ("value", AttributeValue::N("42.5".into())),
        ]
    }

    #[test]
    fn test_insert_with_required_fields_matches() {
        let filter = FilterEngine::default();
        let record = order(EventKind::Insert, &full_fields());
        assert!(filter.matches(&record));
        // Re-evaluation gives the same answer.
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_modify_is_dropped() {
        let filter = FilterEngine::default();
        let record = order(EventKind::Modify, &full_fields());
        assert_eq!(
            filter.check(&record),
            Err(FilterMismatch::EventKind(EventKind::Modify))
        );
    }

    #[test]
    fn test_missing_value_is_dropped() {
        let filter = FilterEngine::default();
        let mut fields = full_fields();
        fields.retain(|(k, _)| *k != "value");
        let record = order(EventKind::Insert, &fields);
        assert_eq!(
            filter.check(&record),
            Err(FilterMismatch::MissingField("value".into()))
        );
    }

    #[test]
    fn test_wrong_primitive_type_is_dropped() {
        let filter = FilterEngine::default();
        let mut fields = full_fields();
        fields[2] = ("value", AttributeValue::S("42.5".into()));
        let record = order(EventKind::Insert, &fields);

        let mismatch = filter.check(&record).unwrap_err();
        assert!(matches!(mismatch, FilterMismatch::WrongType { .. }));
        assert!(mismatch.to_string().contains("value"));
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let filter = FilterEngine::default();
        let mut fields = full_fields();
        fields.push(("notes", AttributeValue::Bool(true)));
        assert!(filter.matches(&order(EventKind::Insert, &fields)));
    }

    #[test]
    fn test_custom_event_kinds() {
        let filter = FilterEngine::new(&FilterConfig {
            event_kinds: vec![EventKind::Insert, EventKind::Modify],
            required_fields: vec![],
        });
        assert!(filter.matches(&order(EventKind::Modify, &[])));
        assert!(!filter.matches(&order(EventKind::Remove, &[])));
    }
}
