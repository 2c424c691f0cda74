//! Run command implementation.

use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use orderpipe_core::config::StartingPosition;
use orderpipe_core::record::ChangeRecord;
use orderpipe_core::stream::{load_json_lines, parse_json_lines, StreamShard};
use orderpipe_core::{Config, Pipeline};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub starting_position: Option<StartingPosition>,
    pub batch_size: Option<usize>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(position) = self.starting_position {
            config.stream.starting_position = position;
        }
        if let Some(size) = self.batch_size {
            config.batch.batch_size = size;
        }
    }
}

/// Run the pipeline over a JSON-lines change stream.
pub async fn run(mut config: Config, input: &Path, overrides: Overrides, follow: bool) -> Result<()> {
    overrides.apply(&mut config);
    config.validate()?;

    info!(
        input = %input.display(),
        shard = %config.stream.shard_id,
        starting_position = ?config.stream.starting_position,
        batch_size = config.batch.batch_size,
        "Starting pipeline"
    );

    let health_port = config.monitoring.health_port;
    let metrics_port = config.monitoring.metrics_port;
    let shard = StreamShard::new(config.stream.shard_id.clone());
    // Open the reader before feeding the shard so LATEST still sees the input.
    let reader = shard.reader(config.stream.starting_position);

    let mut pipeline = Pipeline::from_config(config)?;
    let shutdown_tx = pipeline.shutdown_signal();

    let server_state = Arc::new(ServerState {
        health: pipeline.health(),
        metrics: pipeline.metrics(),
    });
    tokio::spawn(start_server(
        server_state,
        health_port,
        metrics_port,
        shutdown_tx.subscribe(),
    ));

    tokio::spawn(wait_for_signal(shutdown_tx.clone()));

    let records = read_input(input)?;
    let appended = shard.append_all(records)?;
    info!(records = appended, "Input appended to stream shard");
    if !follow {
        shard.close();
    }

    let result = pipeline.run(reader).await;
    let _ = shutdown_tx.send(());
    let report = result?;

    let dead_letters = pipeline.dead_letters();
    if !dead_letters.is_empty() {
        warn!(count = dead_letters.len(), "Records were dead-lettered");
    }

    println!("Records read:       {}", report.records_read);
    println!("Filtered out:       {}", report.filtered_out);
    println!("Batches:            {}", report.batches);
    println!("Enrichment calls:   {}", report.enrichment_calls);
    println!("Published:          {}", report.published);
    println!("Dead-lettered:      {}", report.dead_lettered);
    println!("Sink deliveries:    {}", report.routed_deliveries);
    println!("Failed deliveries:  {}", report.failed_deliveries);
    println!("Unmatched events:   {}", report.unmatched);
    if let Some(checkpoint) = &report.checkpoint {
        println!(
            "Checkpoint:         {}@{}",
            checkpoint.shard_id, checkpoint.sequence_id
        );
    }

    info!("Pipeline stopped");
    Ok(())
}

fn read_input(input: &Path) -> Result<Vec<ChangeRecord>> {
    if input == Path::new("-") {
        let stdin = std::io::stdin();
        return parse_json_lines(stdin.lock()).context("Failed to read stream records from stdin");
    }
    load_json_lines(input)
        .with_context(|| format!("Failed to read stream records from {}", input.display()))
}

/// Send the shutdown signal on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }

    let _ = shutdown_tx.send(());
}
