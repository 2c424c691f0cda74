//! Integration tests for orderpipe-core.
//!
//! Each test drives the full pipeline through the public API: raw stream
//! lines are parsed onto a shard, scored by a deterministic in-test scorer
//! and routed to in-memory sinks.

use async_trait::async_trait;
use orderpipe_core::config::{PartialFailurePolicy, StartingPosition};
use orderpipe_core::dead_letter::InMemoryDeadLetterQueue;
use orderpipe_core::enrichment::{Scorer, ScoringRequest};
use orderpipe_core::health::HealthStatus;
use orderpipe_core::routing::{MemorySink, NotificationSink, SinkRegistry};
use orderpipe_core::stream::{parse_json_lines, StreamShard};
use orderpipe_core::{Config, EnrichmentError, Pipeline, PipelineReport};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const CONFIG: &str = r#"
    [stream]
    starting_position = "EARLIEST"

    [batch]
    batch_size = 5
    flush_timeout_ms = 20

    [[sinks]]
    id = "fraud-team"
    kind = "notification"
    endpoint = "fraud@example.com"

    [[sinks]]
    id = "catch-all"
    kind = "memory"

    [[routing.rules]]
    name = "high-fraud"
    source_prefix = "fraudcheck.orderpipe"
    target = "fraud-team"
    detail = { op = "greater_than", path = "fraudChecks.fraudScore", threshold = 80 }

    [[routing.rules]]
    name = "catch-all"
    target = "catch-all"
"#;

/// Scores by order number; unknown orders score 10.
#[derive(Default)]
struct TableScorer {
    scores: HashMap<String, i64>,
    broken: HashSet<String>,
    calls: Mutex<HashMap<String, usize>>,
}

impl TableScorer {
    fn with_score(mut self, order_number: &str, score: i64) -> Self {
        self.scores.insert(order_number.to_string(), score);
        self
    }

    fn with_broken(mut self, order_number: &str) -> Self {
        self.broken.insert(order_number.to_string());
        self
    }

    fn calls_for(&self, order_number: &str) -> usize {
        self.calls.lock().get(order_number).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Scorer for TableScorer {
    async fn score(&self, request: &ScoringRequest) -> Result<i64, EnrichmentError> {
        let order = request.order_data.order_number.clone();
        *self.calls.lock().entry(order.clone()).or_default() += 1;

        if self.broken.contains(&order) {
            return Err(EnrichmentError::Scoring(format!("scoring failed for {}", order)));
        }
        Ok(self.scores.get(&order).copied().unwrap_or(10))
    }
}

fn insert_line(event_id: &str, order_number: &str) -> String {
    json!({
        "eventID": event_id,
        "eventName": "INSERT",
        "dynamodb": {
            "ApproximateCreationDateTime": 1_700_000_000,
            "NewImage": {
                "PK": {"S": order_number},
                "name": {"S": "Ayla Smith"},
                "value": {"N": "129.99"}
            }
        }
    })
    .to_string()
}

struct Harness {
    pipeline: Pipeline,
    notifications: Arc<NotificationSink>,
    catch_all: Arc<MemorySink>,
    dead_letters: Arc<InMemoryDeadLetterQueue>,
}

fn harness(config: Config, scorer: Arc<TableScorer>) -> Harness {
    let notifications = Arc::new(NotificationSink::new("fraud-team", "fraud@example.com"));
    let catch_all = Arc::new(MemorySink::new("catch-all"));
    let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());

    let mut sinks = SinkRegistry::new();
    sinks.register(notifications.clone());
    sinks.register(catch_all.clone());

    let pipeline = Pipeline::new(config, scorer, sinks, dead_letters.clone())
        .expect("Failed to build pipeline");

    Harness {
        pipeline,
        notifications,
        catch_all,
        dead_letters,
    }
}

fn closed_shard(lines: &[String]) -> StreamShard {
    let records = parse_json_lines(lines.join("\n").as_bytes()).expect("Failed to parse lines");
    let shard = StreamShard::new("shard-0");
    shard.append_all(records).expect("Failed to append");
    shard.close();
    shard
}

async fn run(harness: &mut Harness, shard: &StreamShard) -> PipelineReport {
    harness
        .pipeline
        .run(shard.reader(StartingPosition::Earliest))
        .await
        .expect("Pipeline run failed")
}

fn config() -> Config {
    Config::from_toml_str(CONFIG).expect("Invalid test config")
}

mod scenarios {
    use super::*;

    /// One failing record in a batch of five: four published, one dead-lettered.
    #[tokio::test]
    async fn test_single_failure_is_bisected_and_dead_lettered() {
        let scorer = Arc::new(TableScorer::default().with_broken("1003"));
        let mut harness = harness(config(), scorer.clone());
        let lines: Vec<String> = (1..=5)
            .map(|i| insert_line(&format!("evt-{}", i), &format!("100{}", i)))
            .collect();

        let report = run(&mut harness, &closed_shard(&lines)).await;

        assert_eq!(report.batches, 1);
        assert_eq!(report.published, 4);
        assert_eq!(report.dead_lettered, 1);
        assert!(report.is_balanced());

        let letters = harness.dead_letters.snapshot();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].record.event_id, "evt-3");
        assert_eq!(letters[0].attempts, 2);
        assert!(letters[0].batch_id.ends_with(".0"));
        assert!(letters[0].reason.contains("scoring failed for 1003"));

        // Records that scored on the first attempt are never re-invoked.
        for order in ["1001", "1002", "1004", "1005"] {
            assert_eq!(scorer.calls_for(order), 1, "order {}", order);
        }
        assert_eq!(scorer.calls_for("1003"), 2);
        assert_eq!(harness.catch_all.len(), 4);
    }

    /// A high score reaches both the notification and the catch-all sink.
    #[tokio::test]
    async fn test_high_score_routes_to_notification_and_log() {
        let scorer = Arc::new(TableScorer::default().with_score("1000", 95));
        let mut harness = harness(config(), scorer);

        let report = run(&mut harness, &closed_shard(&[insert_line("evt-1", "1000")])).await;

        assert_eq!(report.published, 1);
        assert_eq!(report.routed_deliveries, 2);

        let outbox = harness.notifications.drain();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].endpoint, "fraud@example.com");
        assert!(outbox[0].subject.contains("score 95 for order 1000"));

        let logged = harness.catch_all.events();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].source, "fraudcheck.orderpipe");
        assert_eq!(logged[0].detail_type, "fraudcheck.rating");
        assert_eq!(logged[0].detail.order_data.order_number, "1000");
        assert_eq!(logged[0].detail.order_data.customer_name, "Ayla Smith");
        assert_eq!(logged[0].detail.order_data.order_value, 129.99);
        assert_eq!(logged[0].fraud_score(), 95);
    }

    /// A low score only reaches the catch-all sink.
    #[tokio::test]
    async fn test_low_score_routes_to_log_only() {
        let scorer = Arc::new(TableScorer::default().with_score("2000", 50));
        let mut harness = harness(config(), scorer);

        let report = run(&mut harness, &closed_shard(&[insert_line("evt-1", "2000")])).await;

        assert_eq!(report.routed_deliveries, 1);
        assert!(harness.notifications.outbox().is_empty());
        assert_eq!(harness.catch_all.len(), 1);
    }

    /// MODIFY events and records missing `value` never reach the batcher.
    #[tokio::test]
    async fn test_filter_drops_modify_and_incomplete_records() {
        let scorer = Arc::new(TableScorer::default());
        let mut harness = harness(config(), scorer.clone());

        let modify = json!({
            "eventID": "evt-m",
            "eventName": "MODIFY",
            "dynamodb": {"NewImage": {
                "PK": {"S": "3000"}, "name": {"S": "A"}, "value": {"N": "1"}
            }}
        })
        .to_string();
        let missing_value = json!({
            "eventID": "evt-v",
            "eventName": "INSERT",
            "dynamodb": {"NewImage": {"PK": {"S": "3001"}, "name": {"S": "A"}}}
        })
        .to_string();

        let report = run(&mut harness, &closed_shard(&[modify, missing_value])).await;

        assert_eq!(report.records_read, 2);
        assert_eq!(report.filtered_out, 2);
        assert_eq!(report.batches, 0);
        assert_eq!(report.published, 0);
        assert!(report.is_balanced());
        assert_eq!(scorer.calls_for("3000"), 0);
        assert_eq!(scorer.calls_for("3001"), 0);
        assert_eq!(report.checkpoint.map(|c| c.sequence_id), Some(2));
    }
}

mod routing {
    use super::*;

    /// The threshold rule fires above 80, never at 80.
    #[tokio::test]
    async fn test_threshold_boundary() {
        let scorer = Arc::new(
            TableScorer::default()
                .with_score("80", 80)
                .with_score("81", 81)
                .with_score("100", 100),
        );
        let mut harness = harness(config(), scorer);
        let lines = vec![
            insert_line("a", "80"),
            insert_line("b", "81"),
            insert_line("c", "100"),
        ];

        run(&mut harness, &closed_shard(&lines)).await;

        let mut notified: Vec<String> = harness
            .notifications
            .outbox()
            .into_iter()
            .map(|n| n.subject)
            .collect();
        notified.sort();
        assert_eq!(notified.len(), 2);
        assert!(notified.iter().all(|s| !s.contains("order 80")));
        assert_eq!(harness.catch_all.len(), 3);
    }

    /// An unrelated extra rule does not change what the existing rules match.
    #[tokio::test]
    async fn test_unrelated_rule_does_not_change_routing() {
        let mut config = config();
        config.sinks.push(orderpipe_core::config::SinkConfig {
            id: "billing".into(),
            kind: orderpipe_core::config::SinkKind::Memory,
            endpoint: None,
            subject_prefix: "[orderpipe]".into(),
        });
        config.routing.rules.push(orderpipe_core::config::RuleConfig {
            name: "billing-only".into(),
            description: Some("Events from the billing service".into()),
            source_prefix: "billing".into(),
            detail: None,
            event_pattern: None,
            target: "billing".into(),
        });

        let notifications = Arc::new(NotificationSink::new("fraud-team", "fraud@example.com"));
        let catch_all = Arc::new(MemorySink::new("catch-all"));
        let billing = Arc::new(MemorySink::new("billing"));
        let mut sinks = SinkRegistry::new();
        sinks.register(notifications.clone());
        sinks.register(catch_all.clone());
        sinks.register(billing.clone());

        let scorer = Arc::new(TableScorer::default().with_score("1", 90));
        let mut pipeline = Pipeline::new(
            config,
            scorer,
            sinks,
            Arc::new(InMemoryDeadLetterQueue::new()),
        )
        .unwrap();

        let shard = closed_shard(&[insert_line("a", "1"), insert_line("b", "2")]);
        let report = pipeline
            .run(shard.reader(StartingPosition::Earliest))
            .await
            .unwrap();

        assert_eq!(report.routed_deliveries, 3);
        assert_eq!(notifications.outbox().len(), 1);
        assert_eq!(catch_all.len(), 2);
        assert!(billing.is_empty());
    }

    /// A rule given as a JSON event pattern routes like its predicate form.
    #[tokio::test]
    async fn test_event_pattern_rule() {
        let toml = CONFIG.replace(
            r#"source_prefix = "fraudcheck.orderpipe"
    target = "fraud-team"
    detail = { op = "greater_than", path = "fraudChecks.fraudScore", threshold = 80 }"#,
            r#"target = "fraud-team"
    event_pattern = '{"source":[{"prefix":"fraudcheck.orderpipe"}],"detail":{"fraudChecks":{"fraudScore":[{"numeric":[">",80]}]}}}'"#,
        );
        let config = Config::from_toml_str(&toml).unwrap();
        assert!(config.routing.rules[0].event_pattern.is_some());

        let scorer = Arc::new(TableScorer::default().with_score("7", 99).with_score("8", 80));
        let mut harness = harness(config, scorer);
        run(
            &mut harness,
            &closed_shard(&[insert_line("a", "7"), insert_line("b", "8")]),
        )
        .await;

        let outbox = harness.notifications.outbox();
        assert_eq!(outbox.len(), 1);
        assert!(outbox[0].subject.contains("order 7"));
        assert_eq!(harness.catch_all.len(), 2);
    }
}

mod accounting {
    use super::*;

    /// Every record read is filtered out, published or dead-lettered exactly once.
    #[tokio::test]
    async fn test_every_record_is_accounted_for() {
        let mut scorer = TableScorer::default();
        for broken in ["5", "6", "7", "8", "9", "21", "33"] {
            scorer = scorer.with_broken(broken);
        }
        let scorer = Arc::new(scorer);
        // Batches only close on size or end of stream.
        let mut config = config();
        config.batch.flush_timeout_ms = 60_000;
        let mut harness = harness(config, scorer.clone());

        let mut lines = Vec::new();
        for i in 1..=40 {
            lines.push(insert_line(&format!("evt-{}", i), &i.to_string()));
            if i % 10 == 0 {
                lines.push(
                    json!({"eventID": format!("rm-{}", i), "eventName": "REMOVE", "dynamodb": {}})
                        .to_string(),
                );
            }
        }

        let report = run(&mut harness, &closed_shard(&lines)).await;

        assert_eq!(report.records_read, 44);
        assert_eq!(report.filtered_out, 4);
        assert_eq!(report.published, 33);
        assert_eq!(report.dead_lettered, 7);
        assert!(report.is_balanced());
        assert_eq!(report.checkpoint.map(|c| c.sequence_id), Some(44));

        let mut seen: Vec<String> = harness
            .catch_all
            .events()
            .into_iter()
            .map(|e| e.detail.event_data.event_id)
            .chain(
                harness
                    .dead_letters
                    .snapshot()
                    .into_iter()
                    .map(|l| l.record.event_id),
            )
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 40);

        // Orders 6..=9 are four failures in one batch: 4 -> 2 -> 1.
        let attempts: HashMap<String, u32> = harness
            .dead_letters
            .snapshot()
            .into_iter()
            .map(|l| (l.record.event_id, l.attempts))
            .collect();
        assert_eq!(attempts["evt-5"], 2);
        for id in ["evt-6", "evt-7", "evt-8", "evt-9"] {
            assert_eq!(attempts[id], 3, "{}", id);
        }
        assert_eq!(attempts["evt-21"], 2);
        for order in 10..=20 {
            assert_eq!(scorer.calls_for(&order.to_string()), 1);
        }
    }

    /// With STOP, failed records are dead-lettered after the first attempt.
    #[tokio::test]
    async fn test_stop_policy_skips_bisection() {
        let mut config = config();
        config.enrichment.on_partial_batch_item_failure = PartialFailurePolicy::Stop;
        let scorer = Arc::new(TableScorer::default().with_broken("2").with_broken("4"));
        let mut harness = harness(config, scorer.clone());
        let lines: Vec<String> = (1..=5)
            .map(|i| insert_line(&format!("evt-{}", i), &i.to_string()))
            .collect();

        let report = run(&mut harness, &closed_shard(&lines)).await;

        assert_eq!(report.published, 3);
        assert_eq!(report.dead_lettered, 2);
        assert_eq!(report.enrichment_calls, 5);
        assert!(harness.dead_letters.snapshot().iter().all(|l| l.attempts == 1));
        assert_eq!(scorer.calls_for("2"), 1);
    }
}

mod stream_positions {
    use super::*;

    /// LATEST skips records already on the shard when the reader opens.
    #[tokio::test]
    async fn test_latest_only_reads_new_records() {
        let scorer = Arc::new(TableScorer::default());
        let mut harness = harness(config(), scorer);

        let shard = StreamShard::new("shard-0");
        let old = parse_json_lines(insert_line("old", "1").as_bytes()).unwrap();
        shard.append_all(old).unwrap();

        let reader = shard.reader(StartingPosition::Latest);
        let new = parse_json_lines(insert_line("new", "2").as_bytes()).unwrap();
        shard.append_all(new).unwrap();
        shard.close();

        let report = harness.pipeline.run(reader).await.unwrap();

        assert_eq!(report.records_read, 1);
        let events = harness.catch_all.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].detail.event_data.event_id, "new");
    }

    /// The commit point starts at the reader's position, not at the shard head.
    #[tokio::test]
    async fn test_latest_checkpoint_covers_new_records() {
        let scorer = Arc::new(TableScorer::default());
        let mut harness = harness(config(), scorer);

        let shard = StreamShard::new("shard-0");
        let old: Vec<String> = (1..=3).map(|i| insert_line(&format!("old-{}", i), "1")).collect();
        shard
            .append_all(parse_json_lines(old.join("\n").as_bytes()).unwrap())
            .unwrap();

        let reader = shard.reader(StartingPosition::Latest);
        let new: Vec<String> = (1..=4).map(|i| insert_line(&format!("new-{}", i), "2")).collect();
        shard
            .append_all(parse_json_lines(new.join("\n").as_bytes()).unwrap())
            .unwrap();
        shard.close();

        let report = harness.pipeline.run(reader).await.unwrap();

        assert_eq!(report.records_read, 4);
        assert_eq!(report.published, 4);
        assert_eq!(report.checkpoint.map(|t| t.sequence_id), Some(7));

        let tracker = harness.pipeline.tracker();
        assert_eq!(tracker.lag("shard-0"), Some(0));
        assert_eq!(tracker.progress("shard-0").unwrap().committed, 7);
    }

    /// Resuming after a checkpoint continues the commit point from there.
    #[tokio::test]
    async fn test_resume_after_checkpoint() {
        let scorer = Arc::new(TableScorer::default());
        let mut harness = harness(config(), scorer);
        let lines: Vec<String> = (1..=5)
            .map(|i| insert_line(&format!("evt-{}", i), &i.to_string()))
            .collect();
        let shard = closed_shard(&lines);
        let token = orderpipe_core::stream::CheckpointToken {
            shard_id: "shard-0".into(),
            sequence_id: 2,
        };

        let report = harness.pipeline.run(shard.reader_after(&token)).await.unwrap();

        assert_eq!(report.records_read, 3);
        assert_eq!(report.checkpoint.map(|t| t.sequence_id), Some(5));
    }
}

mod observability {
    use super::*;

    /// Additional bus subscribers see every published event.
    #[tokio::test]
    async fn test_extra_subscriber_and_metrics() {
        let scorer = Arc::new(TableScorer::default().with_score("1", 42));
        let mut harness = harness(config(), scorer);
        let mut audit = harness.pipeline.subscribe();

        let lines: Vec<String> = (1..=3)
            .map(|i| insert_line(&format!("evt-{}", i), &i.to_string()))
            .collect();
        let report = run(&mut harness, &closed_shard(&lines)).await;

        let mut audited = 0;
        while let Some(event) = audit.recv().await {
            assert!((1..=100).contains(&event.fraud_score()));
            audited += 1;
        }
        assert_eq!(audited, report.published);

        let health = harness.pipeline.health();
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
        assert!(!health.is_pipeline_running());

        let text = harness.pipeline.metrics().export_prometheus_text();
        assert!(text.contains("orderpipe_records_read_total 3"));
        assert!(text.contains("orderpipe_events_published_total 3"));
    }

    /// The random scorer always produces scores in range.
    #[tokio::test]
    async fn test_random_scorer_pipeline() {
        let mut config = config();
        config.sinks[1].kind = orderpipe_core::config::SinkKind::Log;
        let mut pipeline = Pipeline::from_config(config).unwrap();
        let mut events = pipeline.subscribe();

        let lines: Vec<String> = (1..=12)
            .map(|i| insert_line(&format!("evt-{}", i), &i.to_string()))
            .collect();
        let shard = closed_shard(&lines);
        let report = pipeline
            .run(shard.reader(StartingPosition::Earliest))
            .await
            .unwrap();

        assert_eq!(report.published, 12);
        assert_eq!(report.dead_lettered, 0);
        while let Some(event) = events.recv().await {
            assert!((1..=100).contains(&event.fraud_score()));
        }
    }
}

mod configuration {
    use super::*;

    const EXAMPLE_CONFIG: &str = include_str!("../../../config/orderpipe.example.toml");
    const SAMPLE_EVENTS: &str = include_str!("../../../config/sample-events.jsonl");

    /// The shipped example configuration runs the shipped sample stream.
    #[tokio::test]
    async fn test_example_config_runs_sample_events() {
        let config = Config::from_toml_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.stream.starting_position, StartingPosition::Latest);
        assert_eq!(config.routing.rules.len(), 2);

        let shard = StreamShard::new(config.stream.shard_id.clone());
        let reader = shard.reader(config.stream.starting_position);
        let mut pipeline = Pipeline::from_config(config).unwrap();

        shard
            .append_all(parse_json_lines(SAMPLE_EVENTS.as_bytes()).unwrap())
            .unwrap();
        shard.close();

        let report = pipeline.run(reader).await.unwrap();

        // MODIFY, REMOVE and the record without `value` are filtered out.
        assert_eq!(report.records_read, 7);
        assert_eq!(report.filtered_out, 3);
        assert_eq!(report.published, 4);
        assert!(report.is_balanced());
        // Every event reaches the catch-all; some may also reach the fraud team.
        assert!(report.routed_deliveries >= 4);
        assert_eq!(report.unmatched, 0);
    }
}

mod publishing {
    use super::*;
    use orderpipe_core::bus::{EventBus, FanoutBus};
    use orderpipe_core::event::EnrichedEvent;
    use orderpipe_core::health::{components, ComponentStatus};
    use orderpipe_core::{Error, PublishError};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Rejects every event for one order number, delivers the rest.
    struct RejectingBus {
        inner: FanoutBus,
        rejected_order: String,
    }

    #[async_trait]
    impl EventBus for RejectingBus {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn put_event(&self, event: EnrichedEvent) -> Result<(), PublishError> {
            if event.detail.order_data.order_number == self.rejected_order {
                return Err(PublishError::Rejected {
                    bus: self.inner.name().to_string(),
                    message: "throttled".into(),
                });
            }
            self.inner.put_event(event).await
        }

        fn subscribe(&self) -> mpsc::Receiver<Arc<EnrichedEvent>> {
            self.inner.subscribe()
        }

        fn close(&self) {
            self.inner.close()
        }
    }

    /// Publish exhaustion stops the pipeline after in-flight batches finish.
    #[tokio::test]
    async fn test_publish_exhaustion_fails_the_run() {
        let mut config = config();
        config.batch.batch_size = 2;
        config.batch.max_in_flight_batches = 2;
        config.publisher.max_attempts = 2;
        config.publisher.base_backoff_ms = 20;

        let catch_all = Arc::new(MemorySink::new("catch-all"));
        let mut sinks = SinkRegistry::new();
        sinks.register(Arc::new(NotificationSink::new("fraud-team", "fraud@example.com")));
        sinks.register(catch_all.clone());
        let bus = Arc::new(RejectingBus {
            inner: FanoutBus::new("orders-bus", 16, Duration::from_secs(1)),
            rejected_order: "1002".into(),
        });
        let mut pipeline = Pipeline::with_bus(
            config,
            Arc::new(TableScorer::default()),
            sinks,
            Arc::new(InMemoryDeadLetterQueue::new()),
            bus,
        )
        .unwrap();

        let lines: Vec<String> = (1..=4)
            .map(|i| insert_line(&format!("evt-{}", i), &format!("100{}", i)))
            .collect();
        let shard = closed_shard(&lines);

        let err = pipeline
            .run(shard.reader(StartingPosition::Earliest))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Publish(PublishError::Exhausted { attempts: 2, .. })
        ));
        assert!(matches!(
            pipeline.health().get_component_status(components::PUBLISHER),
            Some(ComponentStatus::Unhealthy(_))
        ));
        assert!(!pipeline.health().is_pipeline_running());

        // The other in-flight batch still completes and is routed.
        let mut routed: Vec<String> = catch_all
            .events()
            .iter()
            .map(|e| e.detail.order_data.order_number.clone())
            .collect();
        routed.sort();
        assert_eq!(routed, vec!["1001", "1003", "1004"]);
        assert_eq!(pipeline.metrics().events_published_total(), 3);
    }

    /// A subscriber that never reads is detached instead of blocking publishes.
    #[tokio::test]
    async fn test_idle_subscriber_does_not_block_the_run() {
        let mut config = config();
        config.publisher.bus_capacity = 1;
        config.publisher.subscriber_timeout_ms = 50;
        let mut harness = harness(config, Arc::new(TableScorer::default()));
        let _idle = harness.pipeline.subscribe();

        let lines: Vec<String> = (1..=5)
            .map(|i| insert_line(&format!("evt-{}", i), &i.to_string()))
            .collect();
        let shard = closed_shard(&lines);

        let report = tokio::time::timeout(Duration::from_secs(3), run(&mut harness, &shard))
            .await
            .expect("pipeline blocked on an idle subscriber");

        assert_eq!(report.published, 5);
        assert!(report.is_balanced());
        assert_eq!(harness.catch_all.len(), 5);
    }
}
