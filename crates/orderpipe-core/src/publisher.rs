//! Publishes enriched records as bus events.
//!
//! Emission failures are retried with exponential backoff. Exhausting the
//! attempts is returned as [`PublishError::Exhausted`]: the record was already
//! enriched, so the failure must reach the pipeline instead of being dropped.

use crate::bus::EventBus;
use crate::config::PublisherConfig;
use crate::enrichment::{EnrichedRecord, EnrichmentOutcome, ScoringRequest};
use crate::event::{EnrichedEvent, EventDetail, FraudChecks};
use crate::metrics::{ErrorType, PipelineMetrics};
use crate::retry::RetryConfig;
use crate::{PublishError, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Emits enriched records onto an event bus.
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    source: String,
    detail_type: String,
    retry: RetryConfig,
    metrics: Arc<PipelineMetrics>,
}

impl EventPublisher {
    /// Create a publisher.
    pub fn new(
        bus: Arc<dyn EventBus>,
        config: &PublisherConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            bus,
            source: config.source.clone(),
            detail_type: config.detail_type.clone(),
            retry: RetryConfig::from_publisher(config),
            metrics,
        }
    }

    /// Override the retry configuration.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build the event for a scored record.
    pub fn build_event(&self, enriched: &EnrichedRecord) -> Result<EnrichedEvent> {
        let fraud_score = match &enriched.outcome {
            EnrichmentOutcome::Scored { score } => *score,
            EnrichmentOutcome::Failed { error } => return Err(error.clone().into()),
        };
        let request = ScoringRequest::from_record(&enriched.record)?;

        Ok(EnrichedEvent {
            id: Uuid::new_v4().to_string(),
            source: self.source.clone(),
            detail_type: self.detail_type.clone(),
            time: Utc::now(),
            detail: EventDetail {
                event_data: request.event_data,
                order_data: request.order_data,
                fraud_checks: FraudChecks { fraud_score },
            },
        })
    }

    /// Publish one scored record.
    pub async fn publish(&self, enriched: &EnrichedRecord) -> Result<EnrichedEvent> {
        let event = self.build_event(enriched)?;
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            match self.bus.put_event(event.clone()).await {
                Ok(()) => {
                    self.metrics.record_published();
                    debug!(
                        event_id = %event.id,
                        sequence_id = enriched.record.sequence_id,
                        fraud_score = event.fraud_score(),
                        attempt = attempt + 1,
                        "Event published"
                    );
                    return Ok(event);
                }
                Err(e) if attempt + 1 < max_attempts => {
                    let delay = self.retry.calculate_delay(attempt);
                    warn!(
                        event_id = %event.id,
                        bus = self.bus.name(),
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    self.metrics.record_publish_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.metrics.record_error(ErrorType::Publish);
                    error!(
                        event_id = %event.id,
                        bus = self.bus.name(),
                        attempts = max_attempts,
                        error = %e,
                        "Publish retries exhausted"
                    );
                    return Err(PublishError::Exhausted {
                        event_id: event.id.clone(),
                        attempts: max_attempts,
                        last_error: e.to_string(),
                    }
                    .into());
                }
            }
        }
    }
}
