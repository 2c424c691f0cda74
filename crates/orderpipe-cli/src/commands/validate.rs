//! Validate command implementation.

use orderpipe_core::Config;

/// Print a summary of an already validated configuration.
pub fn run(config: &Config) {
    println!("Configuration is valid\n");
    println!(
        "Stream:      shard {} from {:?}",
        config.stream.shard_id, config.stream.starting_position
    );
    println!(
        "Batching:    {} records or {} ms, {} batches in flight",
        config.batch.batch_size, config.batch.flush_timeout_ms, config.batch.max_in_flight_batches
    );
    println!(
        "Enrichment:  concurrency {}, on failure {:?}",
        config.enrichment.max_concurrency, config.enrichment.on_partial_batch_item_failure
    );
    println!(
        "Publisher:   {} / {} on bus {}",
        config.publisher.source, config.publisher.detail_type, config.publisher.bus_name
    );

    println!("\nSinks:");
    for sink in &config.sinks {
        match &sink.endpoint {
            Some(endpoint) => println!("  {} ({:?}, {})", sink.id, sink.kind, endpoint),
            None => println!("  {} ({:?})", sink.id, sink.kind),
        }
    }

    println!("\nRules:");
    for rule in &config.routing.rules {
        println!("  {} -> {}", rule.name, rule.target);
    }
}
