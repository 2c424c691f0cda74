//! Non-exclusive rule routing.

use super::rule::{Rule, RuleSet};
use super::sink::SinkRegistry;
use crate::event::EnrichedEvent;
use crate::metrics::{ErrorType, PipelineMetrics};
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of dispatching one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteOutcome {
    /// Union of matched sink ids
    pub sinks: BTreeSet<String>,
    /// Successful deliveries
    pub delivered: usize,
    /// Failed deliveries
    pub failed: usize,
}

/// Totals over a router run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingStats {
    /// Events received from the bus
    pub events: u64,
    /// Successful sink deliveries
    pub deliveries: u64,
    /// Failed sink deliveries
    pub failed_deliveries: u64,
    /// Events that matched no rule
    pub unmatched: u64,
}

/// Evaluates every rule against each event and dispatches to the union of
/// matched sinks.
pub struct RuleRouter {
    rules: Arc<RuleSet>,
    sinks: SinkRegistry,
    metrics: Arc<PipelineMetrics>,
}

impl RuleRouter {
    /// Create a router.
    pub fn new(rules: Arc<RuleSet>, sinks: SinkRegistry, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            rules,
            sinks,
            metrics,
        }
    }

    /// Rules that match an event. Every rule is evaluated.
    pub fn matching_rules(&self, event: &EnrichedEvent) -> Vec<&Rule> {
        let view = match serde_json::to_value(event) {
            Ok(view) => view,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Event could not be viewed as JSON");
                Value::Null
            }
        };

        self.rules
            .rules()
            .iter()
            .filter(|rule| rule.matches(&view))
            .collect()
    }

    /// Sink ids an event routes to.
    pub fn route(&self, event: &EnrichedEvent) -> BTreeSet<String> {
        self.matching_rules(event)
            .into_iter()
            .map(|rule| rule.target.clone())
            .collect()
    }

    /// Route an event and deliver it to every matched sink.
    ///
    /// Sink failures are logged and counted; they do not stop delivery to
    /// the other sinks.
    pub async fn dispatch(&self, event: &EnrichedEvent) -> RouteOutcome {
        let sinks = self.route(event);

        let deliveries = sinks.iter().map(|id| async move {
            match self.sinks.get(id) {
                Ok(sink) => sink.deliver(event).await,
                Err(e) => Err(e),
            }
        });
        let results = join_all(deliveries).await;

        let mut outcome = RouteOutcome {
            sinks,
            ..RouteOutcome::default()
        };
        for (id, result) in outcome.sinks.iter().zip(results) {
            match result {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    outcome.failed += 1;
                    self.metrics.record_error(ErrorType::Sink);
                    warn!(event_id = %event.id, sink = %id, error = %e, "Sink delivery failed");
                }
            }
        }

        self.metrics.record_routed(outcome.delivered);
        debug!(
            event_id = %event.id,
            sinks = ?outcome.sinks,
            delivered = outcome.delivered,
            "Event routed"
        );
        outcome
    }

    /// Route events from a bus subscription until it closes.
    pub async fn run(self, mut events: mpsc::Receiver<Arc<EnrichedEvent>>) -> RoutingStats {
        info!(rules = self.rules.len(), "Router started");
        let mut stats = RoutingStats::default();

        while let Some(event) = events.recv().await {
            let outcome = self.dispatch(&event).await;
            stats.events += 1;
            stats.deliveries += outcome.delivered as u64;
            stats.failed_deliveries += outcome.failed as u64;
            if outcome.sinks.is_empty() {
                stats.unmatched += 1;
            }
        }

        info!(
            events = stats.events,
            deliveries = stats.deliveries,
            failed_deliveries = stats.failed_deliveries,
            "Router stopped"
        );
        stats
    }
}
