//! Downstream sinks that receive routed events.

use crate::config::{SinkConfig, SinkKind};
use crate::event::EnrichedEvent;
use crate::{Result, SinkError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Notifications kept per sink before the oldest are dropped.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// An external destination for routed events.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Sink identifier referenced by rules.
    fn id(&self) -> &str;

    /// Deliver one event.
    async fn deliver(&self, event: &EnrichedEvent) -> std::result::Result<(), SinkError>;
}

/// Writes routed events to the structured log.
pub struct LogSink {
    id: String,
}

impl LogSink {
    /// Create a log sink.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Sink for LogSink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn deliver(&self, event: &EnrichedEvent) -> std::result::Result<(), SinkError> {
        let detail = serde_json::to_string(&event.detail).map_err(|e| SinkError::DeliveryFailed {
            sink: self.id.clone(),
            message: e.to_string(),
        })?;

        info!(
            target: "orderpipe::sink::log",
            sink = %self.id,
            event_id = %event.id,
            source = %event.source,
            detail_type = %event.detail_type,
            fraud_score = event.fraud_score(),
            detail = %detail,
            "Routed event"
        );
        Ok(())
    }
}

/// Rendered notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Destination endpoint
    pub endpoint: String,
    /// Subject line
    pub subject: String,
    /// Message body (pretty-printed event)
    pub body: String,
}

/// Renders notifications for a subscriber endpoint.
///
/// Transport is outside this crate: rendered notifications are logged and
/// kept in a bounded outbox that a delivery agent can drain. When the outbox
/// is full the oldest notification is dropped and counted.
pub struct NotificationSink {
    id: String,
    endpoint: String,
    subject_prefix: String,
    outbox_capacity: usize,
    outbox: Mutex<VecDeque<Notification>>,
    dropped: AtomicU64,
}

impl NotificationSink {
    /// Create a notification sink.
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            subject_prefix: "[orderpipe]".to_string(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            outbox: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Set how many undrained notifications are kept.
    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// Set the subject prefix.
    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    /// Render a notification for an event.
    pub fn render(&self, event: &EnrichedEvent) -> std::result::Result<Notification, SinkError> {
        let body =
            serde_json::to_string_pretty(event).map_err(|e| SinkError::DeliveryFailed {
                sink: self.id.clone(),
                message: e.to_string(),
            })?;

        Ok(Notification {
            endpoint: self.endpoint.clone(),
            subject: format!(
                "{} {} score {} for order {}",
                self.subject_prefix,
                event.detail_type,
                event.fraud_score(),
                event.detail.order_data.order_number
            ),
            body,
        })
    }

    /// Notifications rendered so far.
    pub fn outbox(&self) -> Vec<Notification> {
        self.outbox.lock().iter().cloned().collect()
    }

    /// Remove and return rendered notifications.
    pub fn drain(&self) -> Vec<Notification> {
        self.outbox.lock().drain(..).collect()
    }

    /// Notifications dropped because the outbox was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for NotificationSink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn deliver(&self, event: &EnrichedEvent) -> std::result::Result<(), SinkError> {
        let notification = self.render(event)?;
        info!(
            sink = %self.id,
            endpoint = %notification.endpoint,
            subject = %notification.subject,
            "Notification queued"
        );
        let evicted = {
            let mut outbox = self.outbox.lock();
            let evicted = if outbox.len() >= self.outbox_capacity {
                outbox.pop_front()
            } else {
                None
            };
            outbox.push_back(notification);
            evicted
        };
        if let Some(evicted) = evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                sink = %self.id,
                subject = %evicted.subject,
                capacity = self.outbox_capacity,
                "Notification outbox full, dropped oldest"
            );
        }
        Ok(())
    }
}

/// Collects routed events in memory.
pub struct MemorySink {
    id: String,
    events: Mutex<Vec<EnrichedEvent>>,
}

impl MemorySink {
    /// Create a memory sink.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<EnrichedEvent> {
        self.events.lock().clone()
    }

    /// Number of events received.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was received.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn deliver(&self, event: &EnrichedEvent) -> std::result::Result<(), SinkError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Sinks by id.
#[derive(Default, Clone)]
pub struct SinkRegistry {
    sinks: BTreeMap<String, Arc<dyn Sink>>,
}

impl SinkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build sinks from configuration.
    pub fn from_config(configs: &[SinkConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            let sink: Arc<dyn Sink> = match config.kind {
                SinkKind::Log => Arc::new(LogSink::new(&config.id)),
                SinkKind::Memory => Arc::new(MemorySink::new(&config.id)),
                SinkKind::Notification => {
                    let endpoint = config.endpoint.clone().ok_or_else(|| {
                        crate::Error::Config(format!(
                            "Notification sink '{}' requires an endpoint",
                            config.id
                        ))
                    })?;
                    Arc::new(
                        NotificationSink::new(&config.id, endpoint)
                            .with_subject_prefix(&config.subject_prefix),
                    )
                }
            };
            registry.register(sink);
        }
        Ok(registry)
    }

    /// Register a sink, replacing any sink with the same id.
    pub fn register(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.insert(sink.id().to_string(), sink);
    }

    /// Look up a sink.
    pub fn get(&self, id: &str) -> std::result::Result<Arc<dyn Sink>, SinkError> {
        self.sinks
            .get(id)
            .cloned()
            .ok_or_else(|| SinkError::NotFound(id.to_string()))
    }

    /// Registered sink ids.
    pub fn ids(&self) -> Vec<&str> {
        self.sinks.keys().map(String::as_str).collect()
    }

    /// Whether a sink is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.sinks.contains_key(id)
    }
}
