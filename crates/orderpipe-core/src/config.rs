//! Configuration structures for orderpipe.
//!
//! Configuration is loaded once from a TOML file, validated, and passed into
//! component constructors. Components never read process environment.

use crate::record::{AttributeType, EventKind};
use crate::routing::{Predicate, RuleSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Change stream configuration
    #[serde(default)]
    pub stream: StreamConfig,

    /// Source filter configuration
    #[serde(default)]
    pub filter: FilterConfig,

    /// Batching configuration
    #[serde(default)]
    pub batch: BatchConfig,

    /// Enrichment configuration
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Event publisher configuration
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Routing rules
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Downstream sinks
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Where a new reader starts in the stream.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StartingPosition {
    /// Only records written after the reader opened
    #[default]
    Latest,
    /// Oldest record still retained
    Earliest,
}

/// Change stream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Starting position for new readers
    #[serde(default)]
    pub starting_position: StartingPosition,

    /// Shard identifier
    #[serde(default = "default_shard_id")]
    pub shard_id: String,

    /// Capacity of the reader -> batcher queue
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            starting_position: StartingPosition::default(),
            shard_id: default_shard_id(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// A field that must be present with a given primitive type.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RequiredField {
    /// Field name in the new image
    pub name: String,

    /// Expected primitive type
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
}

impl RequiredField {
    /// Create a required field.
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
        }
    }
}

/// Source filter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterConfig {
    /// Event kinds that pass the filter
    #[serde(default = "default_event_kinds")]
    pub event_kinds: Vec<EventKind>,

    /// Fields required on the new image
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<RequiredField>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            event_kinds: default_event_kinds(),
            required_fields: default_required_fields(),
        }
    }
}

/// Batching configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Maximum records per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush a partial batch after this long without reaching batch_size
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Batches enriched concurrently
    #[serde(default = "default_max_in_flight_batches")]
    pub max_in_flight_batches: usize,

    /// Capacity of the batcher -> enrichment queue
    #[serde(default = "default_batch_queue_capacity")]
    pub queue_capacity: usize,
}

impl BatchConfig {
    /// Flush timeout as a duration.
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_timeout_ms: default_flush_timeout_ms(),
            max_in_flight_batches: default_max_in_flight_batches(),
            queue_capacity: default_batch_queue_capacity(),
        }
    }
}

/// What to do with records that fail enrichment inside a batch.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartialFailurePolicy {
    /// Split the failed subset and retry recursively
    #[default]
    AutomaticBisect,
    /// Dead-letter failed records without retrying
    Stop,
}

/// Enrichment configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichmentConfig {
    /// Concurrent scoring calls within one batch
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Deadline for one scoring call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Deadline for one (sub-)batch invocation
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Partial batch failure handling
    #[serde(default)]
    pub on_partial_batch_item_failure: PartialFailurePolicy,
}

impl EnrichmentConfig {
    /// Per-call deadline.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Per-invocation deadline.
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            call_timeout_ms: default_call_timeout_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
            on_partial_batch_item_failure: PartialFailurePolicy::default(),
        }
    }
}

/// Event publisher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherConfig {
    /// Source tag stamped on every event
    #[serde(default = "default_source")]
    pub source: String,

    /// Detail type stamped on every event
    #[serde(default = "default_detail_type")]
    pub detail_type: String,

    /// Event bus name
    #[serde(default = "default_bus_name")]
    pub bus_name: String,

    /// Events buffered per bus subscriber
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// How long an emission waits on a full subscriber queue before that
    /// subscriber is detached
    #[serde(default = "default_subscriber_timeout_ms")]
    pub subscriber_timeout_ms: u64,

    /// Emission attempts before a publish is considered failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Retry delay cap
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl PublisherConfig {
    /// Deadline for one subscriber to accept an event.
    pub fn subscriber_timeout(&self) -> Duration {
        Duration::from_millis(self.subscriber_timeout_ms)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            detail_type: default_detail_type(),
            bus_name: default_bus_name(),
            bus_capacity: default_bus_capacity(),
            subscriber_timeout_ms: default_subscriber_timeout_ms(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Routing rules.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Rules, evaluated independently
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// One routing rule as written in configuration.
///
/// Either `source_prefix` + `detail`, or a JSON `event_pattern`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    /// Unique rule name
    pub name: String,

    /// Human readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Prefix the event source must start with ("" matches all)
    #[serde(default)]
    pub source_prefix: String,

    /// Predicate over the event detail (absent = always true)
    #[serde(default)]
    pub detail: Option<Predicate>,

    /// Event pattern JSON, alternative to source_prefix + detail
    #[serde(default)]
    pub event_pattern: Option<String>,

    /// Target sink id
    pub target: String,
}

/// Sink kind.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Structured log output
    Log,
    /// Notification channel
    Notification,
    /// In-memory collector
    Memory,
}

/// Downstream sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Sink identifier referenced by rules
    pub id: String,

    /// Sink kind
    pub kind: SinkKind,

    /// Notification endpoint (required for notification sinks)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Subject prefix for notifications
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Filter directive for this level.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_shard_id() -> String {
    "shard-0".to_string()
}
fn default_channel_capacity() -> usize {
    100
}
fn default_event_kinds() -> Vec<EventKind> {
    vec![EventKind::Insert]
}
fn default_required_fields() -> Vec<RequiredField> {
    vec![
        RequiredField::new("PK", AttributeType::String),
        RequiredField::new("name", AttributeType::String),
        RequiredField::new("value", AttributeType::Number),
    ]
}
fn default_batch_size() -> usize {
    5
}
fn default_flush_timeout_ms() -> u64 {
    500
}
fn default_max_in_flight_batches() -> usize {
    4
}
fn default_batch_queue_capacity() -> usize {
    8
}
fn default_max_concurrency() -> usize {
    5
}
fn default_call_timeout_ms() -> u64 {
    5000
}
fn default_batch_timeout_ms() -> u64 {
    30000
}
fn default_source() -> String {
    "fraudcheck.orderpipe".to_string()
}
fn default_detail_type() -> String {
    "fraudcheck.rating".to_string()
}
fn default_bus_name() -> String {
    "orders-bus".to_string()
}
fn default_bus_capacity() -> usize {
    1024
}
fn default_subscriber_timeout_ms() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    5000
}
fn default_subject_prefix() -> String {
    "[orderpipe]".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Compiles every routing rule, so a bad rule DSL or threshold fails here,
    /// before any stream consumption begins.
    pub fn validate(&self) -> crate::Result<()> {
        if self.stream.shard_id.is_empty() {
            return Err(crate::Error::Config("Shard id is required".into()));
        }

        if self.stream.channel_capacity == 0 {
            return Err(crate::Error::Config(
                "stream.channel_capacity must be at least 1".into(),
            ));
        }

        if self.filter.event_kinds.is_empty() {
            return Err(crate::Error::Config(
                "filter.event_kinds must list at least one event kind".into(),
            ));
        }

        if self.batch.batch_size == 0 {
            return Err(crate::Error::Config(
                "batch.batch_size must be at least 1".into(),
            ));
        }

        if self.batch.flush_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "batch.flush_timeout_ms must be positive".into(),
            ));
        }

        if self.batch.max_in_flight_batches == 0 || self.batch.queue_capacity == 0 {
            return Err(crate::Error::Config(
                "batch.max_in_flight_batches and batch.queue_capacity must be at least 1".into(),
            ));
        }

        if self.enrichment.max_concurrency == 0 {
            return Err(crate::Error::Config(
                "enrichment.max_concurrency must be at least 1".into(),
            ));
        }

        if self.enrichment.call_timeout_ms == 0 || self.enrichment.batch_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "enrichment timeouts must be positive".into(),
            ));
        }

        if self.publisher.source.is_empty() || self.publisher.detail_type.is_empty() {
            return Err(crate::Error::Config(
                "publisher.source and publisher.detail_type are required".into(),
            ));
        }

        if self.publisher.max_attempts == 0 {
            return Err(crate::Error::Config(
                "publisher.max_attempts must be at least 1".into(),
            ));
        }

        if self.publisher.bus_capacity == 0 {
            return Err(crate::Error::Config(
                "publisher.bus_capacity must be at least 1".into(),
            ));
        }

        if self.publisher.subscriber_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "publisher.subscriber_timeout_ms must be greater than 0".into(),
            ));
        }

        let mut sink_ids = HashSet::new();
        for sink in &self.sinks {
            if sink.id.is_empty() {
                return Err(crate::Error::Config("Sink id is required".into()));
            }
            if !sink_ids.insert(sink.id.as_str()) {
                return Err(crate::Error::Config(format!(
                    "Duplicate sink id: {}",
                    sink.id
                )));
            }
            if sink.kind == SinkKind::Notification
                && sink.endpoint.as_deref().map_or(true, str::is_empty)
            {
                return Err(crate::Error::Config(format!(
                    "Notification sink '{}' requires an endpoint",
                    sink.id
                )));
            }
        }

        let rules = RuleSet::compile(&self.routing.rules)?;
        rules.check_targets(&sink_ids)?;

        if rules.is_empty() {
            tracing::warn!("No routing rules configured, published events reach no sink");
        }

        Ok(())
    }
}
