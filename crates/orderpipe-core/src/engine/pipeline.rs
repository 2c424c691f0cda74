//! The enrichment and routing pipeline.
//!
//! Stages run as separate tasks connected by bounded channels, so a slow
//! stage applies backpressure all the way back to the stream reader.

use crate::batch::{Batch, Batcher};
use crate::bus::{EventBus, FanoutBus};
use crate::config::Config;
use crate::dead_letter::{DeadLetterQueue, InMemoryDeadLetterQueue};
use crate::enrichment::{BisectRetrier, EnrichmentInvoker, RandomScorer, Scorer};
use crate::event::EnrichedEvent;
use crate::filter::FilterEngine;
use crate::health::{components, HealthCheck};
use crate::metrics::PipelineMetrics;
use crate::publisher::EventPublisher;
use crate::record::ChangeRecord;
use crate::routing::{RoutingStats, RuleRouter, RuleSet, SinkRegistry};
use crate::stream::{CheckpointToken, SequenceTracker, StreamReader};
use crate::{Error, Result, StreamError};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Totals for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    /// Records read from the stream
    pub records_read: u64,
    /// Records dropped by the filter
    pub filtered_out: u64,
    /// Batches emitted by the batcher
    pub batches: u64,
    /// Scoring calls, including bisection retries
    pub enrichment_calls: u64,
    /// Events published onto the bus
    pub published: u64,
    /// Records sent to the dead-letter queue
    pub dead_lettered: u64,
    /// Successful sink deliveries
    pub routed_deliveries: u64,
    /// Failed sink deliveries
    pub failed_deliveries: u64,
    /// Published events that matched no rule
    pub unmatched: u64,
    /// Last contiguous sequence id fully accounted for
    pub checkpoint: Option<CheckpointToken>,
}

impl PipelineReport {
    /// Every record read was filtered out, published or dead-lettered.
    pub fn is_balanced(&self) -> bool {
        self.filtered_out + self.published + self.dead_lettered == self.records_read
    }
}

enum Step {
    Finished(Result<()>),
    Received(Option<Batch>),
}

/// Staged CDC enrichment pipeline.
pub struct Pipeline {
    config: Config,
    filter: Arc<FilterEngine>,
    retrier: BisectRetrier,
    publisher: EventPublisher,
    bus: Arc<dyn EventBus>,
    router: Option<(RuleRouter, mpsc::Receiver<Arc<EnrichedEvent>>)>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    tracker: Arc<SequenceTracker>,
    metrics: Arc<PipelineMetrics>,
    health: Arc<HealthCheck>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Pipeline {
    /// Create a pipeline from its configuration and injected capabilities,
    /// publishing onto an in-process [`FanoutBus`].
    ///
    /// Fails on invalid configuration or when a rule targets a sink that is
    /// not registered, before any record is consumed.
    pub fn new(
        config: Config,
        scorer: Arc<dyn Scorer>,
        sinks: SinkRegistry,
        dead_letters: Arc<dyn DeadLetterQueue>,
    ) -> Result<Self> {
        let bus = Arc::new(FanoutBus::new(
            config.publisher.bus_name.clone(),
            config.publisher.bus_capacity,
            config.publisher.subscriber_timeout(),
        ));
        Self::with_bus(config, scorer, sinks, dead_letters, bus)
    }

    /// Create a pipeline that publishes onto the given bus.
    ///
    /// The router subscribes to the bus here, before anything is published.
    pub fn with_bus(
        config: Config,
        scorer: Arc<dyn Scorer>,
        sinks: SinkRegistry,
        dead_letters: Arc<dyn DeadLetterQueue>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self> {
        config.validate()?;

        let rules = RuleSet::compile(&config.routing.rules)?;
        let registered: HashSet<&str> = sinks.ids().into_iter().collect();
        rules.check_targets(&registered)?;

        let metrics = Arc::new(PipelineMetrics::new());
        let health = Arc::new(HealthCheck::for_pipeline());

        let invoker = EnrichmentInvoker::new(scorer, &config.enrichment, metrics.clone());
        let retrier = BisectRetrier::new(
            invoker,
            config.enrichment.on_partial_batch_item_failure,
            metrics.clone(),
        );

        let publisher = EventPublisher::new(bus.clone(), &config.publisher, metrics.clone());

        // Subscribe before anything is published so the router sees every event.
        let events = bus.subscribe();
        let router = RuleRouter::new(Arc::new(rules), sinks, metrics.clone());

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            shard = %config.stream.shard_id,
            batch_size = config.batch.batch_size,
            max_concurrency = config.enrichment.max_concurrency,
            policy = ?config.enrichment.on_partial_batch_item_failure,
            rules = config.routing.rules.len(),
            "Pipeline initialized"
        );

        Ok(Self {
            filter: Arc::new(FilterEngine::new(&config.filter)),
            retrier,
            publisher,
            bus,
            router: Some((router, events)),
            dead_letters,
            tracker: Arc::new(SequenceTracker::new()),
            metrics,
            health,
            shutdown_tx,
            config,
        })
    }

    /// Create a pipeline with the random scorer, sinks built from
    /// configuration and an in-memory dead-letter queue.
    pub fn from_config(config: Config) -> Result<Self> {
        let sinks = SinkRegistry::from_config(&config.sinks)?;
        Self::new(
            config,
            Arc::new(RandomScorer::new()),
            sinks,
            Arc::new(InMemoryDeadLetterQueue::new()),
        )
    }

    /// Attach an additional bus subscriber. Call before [`Pipeline::run`].
    pub fn subscribe(&self) -> mpsc::Receiver<Arc<EnrichedEvent>> {
        self.bus.subscribe()
    }

    /// Run until the stream ends or shutdown is signalled, then drain every
    /// in-flight batch.
    ///
    /// Returns an error on publish exhaustion or when a stage fails; per-record
    /// enrichment failures end up in the dead-letter queue instead.
    pub async fn run<R>(&mut self, reader: R) -> Result<PipelineReport>
    where
        R: StreamReader + 'static,
    {
        let (router, events) = self
            .router
            .take()
            .ok_or_else(|| Error::Config("Pipeline has already run".into()))?;

        let shard_id = reader.shard_id().to_string();
        let start = reader.checkpoint();
        if let Some(token) = &start {
            // Everything up to the reader's starting position is behind the pipeline.
            self.tracker.start(&shard_id, token.sequence_id);
        }
        info!(
            shard = %shard_id,
            start_sequence = start.map(|t| t.sequence_id).unwrap_or(0),
            "Starting pipeline"
        );
        self.health.pipeline_started();
        for name in components::ALL {
            self.health.mark_healthy(name);
        }

        let (record_tx, record_rx) = mpsc::channel(self.config.stream.channel_capacity);
        let (batch_tx, batch_rx) = mpsc::channel(self.config.batch.queue_capacity);

        let router_task = tokio::spawn(router.run(events));
        let reader_task = self.spawn_reader(reader, record_tx);
        let batcher_task = tokio::spawn(Batcher::from_config(&self.config.batch).run(
            record_rx,
            batch_tx,
            self.metrics.clone(),
        ));

        let processed = self.process_batches(batch_rx, &shard_id).await;
        if processed.is_err() {
            // Stop intake; the closed batch channel unwinds the earlier stages.
            let _ = self.shutdown_tx.send(());
        }

        let read = join_stage(reader_task, "reader").await;
        if let Err(e) = &read {
            self.health.mark_unhealthy(components::STREAM, &e.to_string());
        }
        let batched = join_stage(batcher_task, "batcher").await;
        if let Err(e) = &batched {
            self.health.mark_unhealthy(components::BATCHER, &e.to_string());
        }

        // Every batch is resolved: let the router drain what is on the bus.
        self.bus.close();
        let routing = match router_task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Router task failed");
                self.health
                    .mark_unhealthy(components::ROUTER, &format!("Router task failed: {}", e));
                RoutingStats::default()
            }
        };

        self.health.pipeline_stopped();

        processed?;
        read?;
        batched?;

        let report = self.report(&shard_id, routing);
        info!(
            records_read = report.records_read,
            filtered_out = report.filtered_out,
            batches = report.batches,
            published = report.published,
            dead_lettered = report.dead_lettered,
            routed_deliveries = report.routed_deliveries,
            "Pipeline stopped"
        );
        if !report.is_balanced() {
            warn!(?report, "Pipeline accounting does not balance");
        }
        Ok(report)
    }

    fn spawn_reader<R>(
        &self,
        mut reader: R,
        output: mpsc::Sender<ChangeRecord>,
    ) -> JoinHandle<Result<()>>
    where
        R: StreamReader + 'static,
    {
        let filter = self.filter.clone();
        let tracker = self.tracker.clone();
        let metrics = self.metrics.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let shard_id = reader.shard_id().to_string();
            loop {
                let record = tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        info!(shard = %shard_id, "Shutdown signal received, stopping stream reader");
                        break;
                    }
                    record = reader.next() => record,
                };

                let Some(record) = record else {
                    info!(shard = %shard_id, "End of stream reached");
                    break;
                };

                metrics.record_read();
                tracker.mark_read(&shard_id, record.sequence_id);

                if let Err(mismatch) = filter.check(&record) {
                    metrics.record_filtered_out();
                    tracker.mark_completed(&shard_id, record.sequence_id);
                    debug!(
                        sequence_id = record.sequence_id,
                        event_id = %record.event_id,
                        reason = %mismatch,
                        "Record filtered out"
                    );
                    continue;
                }

                if output.send(record).await.is_err() {
                    return Err(StreamError::StageClosed("batcher").into());
                }
            }
            Ok(())
        })
    }

    /// Resolve batches, up to `max_in_flight_batches` at a time.
    ///
    /// After a failure no new batch is accepted, but the ones already in
    /// flight still finish.
    async fn process_batches(&self, mut batches: mpsc::Receiver<Batch>, shard_id: &str) -> Result<()> {
        let limit = self.config.batch.max_in_flight_batches;
        let mut in_flight = FuturesUnordered::new();
        let mut accepting = true;
        let mut first_error = None;

        loop {
            if !accepting && in_flight.is_empty() {
                break;
            }

            let step = tokio::select! {
                Some(result) = in_flight.next(), if !in_flight.is_empty() => Step::Finished(result),
                batch = batches.recv(), if accepting && in_flight.len() < limit => Step::Received(batch),
                else => break,
            };

            match step {
                Step::Received(Some(batch)) => in_flight.push(self.handle_batch(batch, shard_id)),
                Step::Received(None) => accepting = false,
                Step::Finished(Ok(())) => {}
                Step::Finished(Err(e)) => {
                    if accepting {
                        error!(error = %e, "Batch failed, draining in-flight batches");
                        accepting = false;
                    }
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn handle_batch(&self, batch: Batch, shard_id: &str) -> Result<()> {
        self.metrics.batch_started();
        let result = self.resolve_batch(batch, shard_id).await;
        self.metrics.batch_finished();
        if let Some(lag) = self.tracker.lag(shard_id) {
            self.metrics.set_checkpoint_lag(lag);
        }
        result
    }

    async fn resolve_batch(&self, batch: Batch, shard_id: &str) -> Result<()> {
        let outcome = self.retrier.process(batch).await;

        if outcome.dead_letters.is_empty() {
            self.health.mark_healthy(components::ENRICHMENT);
        } else {
            self.health.mark_degraded(
                components::ENRICHMENT,
                &format!(
                    "{} of {} records dead-lettered in batch {}",
                    outcome.dead_letters.len(),
                    outcome.dead_letters.len() + outcome.enriched.len(),
                    outcome.batch_id
                ),
            );
        }

        for letter in outcome.dead_letters {
            let sequence_id = letter.record.sequence_id;
            self.dead_letters.send(letter).await?;
            self.tracker.mark_completed(shard_id, sequence_id);
        }

        for enriched in &outcome.enriched {
            if let Err(e) = self.publisher.publish(enriched).await {
                self.health
                    .mark_unhealthy(components::PUBLISHER, &e.to_string());
                return Err(e);
            }
            self.tracker
                .mark_completed(shard_id, enriched.record.sequence_id);
        }

        debug!(
            batch_id = %outcome.batch_id,
            published = outcome.enriched.len(),
            invocations = outcome.invocations,
            "Batch completed"
        );
        Ok(())
    }

    fn report(&self, shard_id: &str, routing: RoutingStats) -> PipelineReport {
        PipelineReport {
            records_read: self.metrics.records_read_total(),
            filtered_out: self.metrics.records_filtered_out_total(),
            batches: self.metrics.batches_total(),
            enrichment_calls: self.metrics.enrichment_calls_total(),
            published: self.metrics.events_published_total(),
            dead_lettered: self.metrics.dead_letters_total(),
            routed_deliveries: routing.deliveries,
            failed_deliveries: routing.failed_deliveries,
            unmatched: routing.unmatched,
            checkpoint: self.tracker.checkpoint(shard_id),
        }
    }

    /// Signal the pipeline to stop reading. In-flight work still drains.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get shutdown signal sender.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Get metrics.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Get health check.
    pub fn health(&self) -> Arc<HealthCheck> {
        self.health.clone()
    }

    /// Get the dead-letter queue.
    pub fn dead_letters(&self) -> Arc<dyn DeadLetterQueue> {
        self.dead_letters.clone()
    }

    /// Get the sequence tracker.
    pub fn tracker(&self) -> Arc<SequenceTracker> {
        self.tracker.clone()
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

async fn join_stage(task: JoinHandle<Result<()>>, stage: &'static str) -> Result<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => {
            error!(stage, error = %e, "Pipeline stage task failed");
            Err(StreamError::StageClosed(stage).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuleConfig, SinkConfig, SinkKind, StartingPosition};
    use crate::enrichment::ScoringRequest;
    use crate::record::{AttributeValue, EventKind};
    use crate::routing::{MemorySink, Predicate};
    use crate::stream::StreamShard;
    use crate::EnrichmentError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn order(event_id: &str, order_number: &str) -> ChangeRecord {
        let mut fields = BTreeMap::new();
        fields.insert("PK".to_string(), AttributeValue::S(order_number.into()));
        fields.insert("name".to_string(), AttributeValue::S("Ayla".into()));
        fields.insert("value".to_string(), AttributeValue::N("42.5".into()));
        ChangeRecord::new(event_id, EventKind::Insert, fields, 1_700_000_000)
    }

    /// Scores every order with its order number.
    struct EchoScorer;

    #[async_trait]
    impl Scorer for EchoScorer {
        async fn score(&self, request: &ScoringRequest) -> std::result::Result<i64, EnrichmentError> {
            request
                .order_data
                .order_number
                .parse()
                .map_err(|_| EnrichmentError::Scoring("not a number".into()))
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.stream.starting_position = StartingPosition::Earliest;
        config.batch.flush_timeout_ms = 20;
        config.sinks = vec![SinkConfig {
            id: "log".into(),
            kind: SinkKind::Memory,
            endpoint: None,
            subject_prefix: "[orderpipe]".into(),
        }];
        config.routing.rules = vec![RuleConfig {
            name: "catch-all".into(),
            description: None,
            source_prefix: String::new(),
            detail: Some(Predicate::Always),
            event_pattern: None,
            target: "log".into(),
        }];
        config
    }

    fn pipeline(config: Config) -> (Pipeline, Arc<MemorySink>, Arc<InMemoryDeadLetterQueue>) {
        let sink = Arc::new(MemorySink::new("log"));
        let mut sinks = SinkRegistry::new();
        sinks.register(sink.clone());
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let pipeline = Pipeline::new(config, Arc::new(EchoScorer), sinks, dlq.clone()).unwrap();
        (pipeline, sink, dlq)
    }

    #[tokio::test]
    async fn test_run_to_end_of_stream() {
        let shard = StreamShard::new("shard-0");
        for i in 1..=7 {
            shard.append(order(&format!("e{}", i), &i.to_string())).unwrap();
        }
        shard
            .append(ChangeRecord::new("r", EventKind::Remove, BTreeMap::new(), 0))
            .unwrap();
        shard.close();

        let (mut pipeline, sink, dlq) = pipeline(config());
        let report = pipeline.run(shard.reader(StartingPosition::Earliest)).await.unwrap();

        assert_eq!(report.records_read, 8);
        assert_eq!(report.filtered_out, 1);
        assert_eq!(report.batches, 2);
        assert_eq!(report.published, 7);
        assert_eq!(report.dead_lettered, 0);
        assert_eq!(report.routed_deliveries, 7);
        assert!(report.is_balanced());
        assert_eq!(report.checkpoint.unwrap().sequence_id, 8);
        assert_eq!(sink.len(), 7);
        assert!(dlq.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_runs_once() {
        let shard = StreamShard::new("shard-0");
        shard.close();

        let (mut pipeline, _, _) = pipeline(config());
        pipeline.run(shard.reader(StartingPosition::Earliest)).await.unwrap();
        let err = pipeline
            .run(shard.reader(StartingPosition::Earliest))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_records() {
        let shard = StreamShard::new("shard-0");
        shard.append(order("e1", "10")).unwrap();
        shard.append(order("e2", "20")).unwrap();

        let (mut pipeline, sink, _) = pipeline(config());
        let shutdown = pipeline.shutdown_signal();
        let reader = shard.reader(StartingPosition::Earliest);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = shutdown.send(());
        });

        // The shard stays open: only the shutdown signal ends the run.
        let report = pipeline.run(reader).await.unwrap();
        stopper.await.unwrap();

        assert_eq!(report.published, 2);
        assert!(report.is_balanced());
        assert_eq!(sink.len(), 2);
        assert!(!pipeline.health().is_pipeline_running());
    }

    #[tokio::test]
    async fn test_dead_letters_degrade_enrichment_health() {
        let shard = StreamShard::new("shard-0");
        shard.append(order("e1", "10")).unwrap();
        shard.append(order("e2", "not-a-number")).unwrap();
        shard.close();

        let (mut pipeline, _, dlq) = pipeline(config());
        let report = pipeline.run(shard.reader(StartingPosition::Earliest)).await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        assert_eq!(dlq.len(), 1);
        let health = pipeline.health();
        assert!(matches!(
            health.get_component_status(components::ENRICHMENT),
            Some(crate::health::ComponentStatus::Degraded(_))
        ));
        assert_eq!(
            health.get_component_status(components::BATCHER),
            Some(crate::health::ComponentStatus::Healthy)
        );
    }

    #[test]
    fn test_unregistered_sink_is_rejected() {
        let err = Pipeline::new(
            config(),
            Arc::new(EchoScorer),
            SinkRegistry::new(),
            Arc::new(InMemoryDeadLetterQueue::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Rule(_)));
    }
}
