//! Error types for the orderpipe core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Failures that stay local to one record (enrichment, dead-lettering) are
//! carried as values in outcomes; only the variants below ever surface as a
//! pipeline-visible `Err`.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for orderpipe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for orderpipe.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Change stream error
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Enrichment error that escaped per-record isolation
    #[error("Enrichment error: {0}")]
    Enrichment(#[from] EnrichmentError),

    /// Publish error (fatal for the affected record's delivery)
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Routing rule error
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Sink delivery error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// Change stream errors.
#[derive(Error, Debug)]
pub enum StreamError {
    /// A raw stream record could not be decoded
    #[error("Malformed stream record at line {line}: {message}")]
    MalformedRecord { line: usize, message: String },

    /// Unknown event name on a stream record
    #[error("Unknown event name: {0}")]
    UnknownEventName(String),

    /// The shard was closed while appending
    #[error("Shard {0} is closed")]
    ShardClosed(String),

    /// Downstream stage hung up
    #[error("Pipeline stage closed: {0}")]
    StageClosed(&'static str),
}

/// Per-record enrichment failures.
///
/// These are transient and isolated: they become an
/// [`EnrichmentOutcome::Failed`](crate::enrichment::EnrichmentOutcome) for the
/// one record and feed bisection, never failing sibling records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnrichmentError {
    /// The scoring service returned an error
    #[error("Scoring failed: {0}")]
    Scoring(String),

    /// The call exceeded its deadline
    #[error("Scoring timed out after {0:?}")]
    Timeout(Duration),

    /// The scorer returned a value outside [1, 100]
    #[error("Score {0} out of range [1, 100]")]
    OutOfRange(i64),

    /// The record could not be reshaped into order data
    #[error("Record {sequence_id} rejected: {message}")]
    Rejected { sequence_id: String, message: String },

    /// The scoring task panicked or was cancelled
    #[error("Scoring task aborted: {0}")]
    Aborted(String),
}

/// Event publishing errors.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Bus rejected a single emission attempt
    #[error("Bus {bus} rejected event: {message}")]
    Rejected { bus: String, message: String },

    /// No subscriber is attached to the bus
    #[error("Bus {0} has no subscribers")]
    NoSubscribers(String),

    /// Every subscriber left its queue full past the deadline
    #[error("Every subscriber of bus {bus} stalled for {timeout:?}")]
    Stalled { bus: String, timeout: Duration },

    /// All retry attempts are exhausted
    #[error("Publishing event {event_id} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        event_id: String,
        attempts: u32,
        last_error: String,
    },
}

/// Routing rule errors (configuration errors, fatal at startup).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    /// Rule definition is invalid
    #[error("Invalid rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },

    /// Event pattern JSON could not be compiled
    #[error("Invalid event pattern for rule '{rule}': {message}")]
    InvalidPattern { rule: String, message: String },

    /// Rule targets a sink that is not registered
    #[error("Rule '{rule}' targets unknown sink '{sink}'")]
    UnknownSink { rule: String, sink: String },

    /// Two rules share a name
    #[error("Duplicate rule name: {0}")]
    DuplicateRule(String),
}

/// Sink delivery errors.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Sink is not registered
    #[error("Sink not found: {0}")]
    NotFound(String),

    /// Delivery failed
    #[error("Delivery to sink {sink} failed: {message}")]
    DeliveryFailed { sink: String, message: String },
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
