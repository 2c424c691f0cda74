//! Change record model.
//!
//! A [`ChangeRecord`] is one mutation read from the record store's change
//! stream. Field values keep the store's typed-attribute encoding
//! (`{"S": "..."}`, `{"N": "12.50"}`, ...) so the filter can check primitive
//! types rather than just presence.

use crate::{Error, Result, StreamError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of mutation carried by a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    /// A new item was written
    Insert,
    /// An existing item was modified
    Modify,
    /// An item was removed
    Remove,
}

impl EventKind {
    /// Wire name of the event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Insert => "INSERT",
            EventKind::Modify => "MODIFY",
            EventKind::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(EventKind::Insert),
            "MODIFY" => Ok(EventKind::Modify),
            "REMOVE" => Ok(EventKind::Remove),
            other => Err(StreamError::UnknownEventName(other.to_string()).into()),
        }
    }
}

/// Primitive type tag of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AttributeType {
    /// String
    #[serde(rename = "S")]
    String,
    /// Number (decimal string on the wire)
    #[serde(rename = "N")]
    Number,
    /// Boolean
    #[serde(rename = "BOOL")]
    Bool,
    /// Null marker
    #[serde(rename = "NULL")]
    Null,
    /// Nested map
    #[serde(rename = "M")]
    Map,
    /// List
    #[serde(rename = "L")]
    List,
}

/// A typed attribute value as encoded by the record store.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AttributeValue {
    /// String value
    #[serde(rename = "S")]
    S(String),
    /// Number value, kept as its decimal string
    #[serde(rename = "N")]
    N(String),
    /// Boolean value
    #[serde(rename = "BOOL")]
    Bool(bool),
    /// Null value
    #[serde(rename = "NULL")]
    Null(bool),
    /// Map value
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
    /// List value
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Get the primitive type tag.
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::S(_) => AttributeType::String,
            AttributeValue::N(_) => AttributeType::Number,
            AttributeValue::Bool(_) => AttributeType::Bool,
            AttributeValue::Null(_) => AttributeType::Null,
            AttributeValue::M(_) => AttributeType::Map,
            AttributeValue::L(_) => AttributeType::List,
        }
    }

    /// Get the string payload of an `S` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Parse the payload of an `N` value.
    ///
    /// Returns `None` for non-numbers and for `N` strings that do not parse.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::N(n) => n.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }
}

/// A single mutation read from the change stream. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    /// Position of the record within its shard (assigned on append)
    pub sequence_id: u64,
    /// Store-assigned event identifier
    pub event_id: String,
    /// Mutation kind
    pub event_kind: EventKind,
    /// New image of the item
    pub fields: BTreeMap<String, AttributeValue>,
    /// Approximate creation time (seconds since epoch)
    pub approx_creation_time: i64,
}

impl ChangeRecord {
    /// Create a record that has not yet been placed on a shard.
    pub fn new(
        event_id: impl Into<String>,
        event_kind: EventKind,
        fields: BTreeMap<String, AttributeValue>,
        approx_creation_time: i64,
    ) -> Self {
        Self {
            sequence_id: 0,
            event_id: event_id.into(),
            event_kind,
            fields,
            approx_creation_time,
        }
    }

    /// Stamp the shard position.
    pub(crate) fn with_sequence(mut self, sequence_id: u64) -> Self {
        self.sequence_id = sequence_id;
        self
    }

    /// Look up a field of the new image.
    pub fn field(&self, name: &str) -> Option<&AttributeValue> {
        self.fields.get(name)
    }

    /// Look up a string field.
    pub fn string_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(AttributeValue::as_str)
    }

    /// Look up and parse a number field.
    pub fn number_field(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(AttributeValue::as_number)
    }
}

/// Change record as delivered by the record store's stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    /// Event identifier
    #[serde(rename = "eventID")]
    pub event_id: String,
    /// INSERT, MODIFY or REMOVE
    pub event_name: String,
    /// Originating service, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    /// Item payload
    pub dynamodb: StreamRecordData,
}

/// Item payload of a stream record.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamRecordData {
    /// Approximate creation time (seconds since epoch)
    #[serde(default)]
    pub approximate_creation_date_time: i64,
    /// Store sequence number, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
    /// New image of the item (absent for REMOVE)
    #[serde(default)]
    pub new_image: BTreeMap<String, AttributeValue>,
}

impl TryFrom<StreamRecord> for ChangeRecord {
    type Error = Error;

    fn try_from(raw: StreamRecord) -> Result<Self> {
        let kind: EventKind = raw.event_name.parse()?;
        Ok(ChangeRecord::new(
            raw.event_id,
            kind,
            raw.dynamodb.new_image,
            raw.dynamodb.approximate_creation_date_time,
        ))
    }
}
