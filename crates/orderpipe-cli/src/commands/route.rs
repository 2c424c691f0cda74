//! Route command implementation.

use anyhow::{Context, Result};
use orderpipe_core::event::EnrichedEvent;
use orderpipe_core::metrics::PipelineMetrics;
use orderpipe_core::routing::{RuleRouter, RuleSet, SinkRegistry};
use orderpipe_core::Config;
use std::path::Path;
use std::sync::Arc;

/// Evaluate every rule against one event and print the matches.
pub async fn run(config: Config, event_path: &Path, deliver: bool) -> Result<()> {
    config.validate()?;

    let content = std::fs::read_to_string(event_path)
        .with_context(|| format!("Failed to read event from {}", event_path.display()))?;
    let event: EnrichedEvent = serde_json::from_str(&content).context("Failed to parse event")?;

    let rules = Arc::new(RuleSet::compile(&config.routing.rules)?);
    let sinks = SinkRegistry::from_config(&config.sinks)?;
    let router = RuleRouter::new(rules, sinks, Arc::new(PipelineMetrics::new()));

    let matched = router.matching_rules(&event);
    println!(
        "Event {} (source={}, detailType={}, fraudScore={})",
        event.id,
        event.source,
        event.detail_type,
        event.fraud_score()
    );

    if matched.is_empty() {
        println!("No rule matched");
        return Ok(());
    }

    println!("\nMatched rules:");
    for rule in &matched {
        match &rule.description {
            Some(description) => println!("  {} -> {} ({})", rule.name, rule.target, description),
            None => println!("  {} -> {}", rule.name, rule.target),
        }
    }

    let sinks = router.route(&event);
    println!("\nSinks: {}", sinks.into_iter().collect::<Vec<_>>().join(", "));

    if deliver {
        let outcome = router.dispatch(&event).await;
        println!(
            "\nDelivered: {}, failed: {}",
            outcome.delivered, outcome.failed
        );
    }

    Ok(())
}
