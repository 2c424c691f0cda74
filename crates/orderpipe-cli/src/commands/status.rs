//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    pipeline_running: bool,
    uptime_seconds: Option<u64>,
    components: HashMap<String, ComponentStatus>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    message: Option<String>,
}

/// Show status and health.
pub async fn run(url: &str, metrics_url: Option<&str>) -> Result<()> {
    println!("Checking health at {}...\n", url);

    // Fetch health status
    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    match client.get(&health_url).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => {
                    print_health_status(&health, status_code.as_u16());
                }
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the orderpipe pipeline running?");
            println!("Start it with: orderpipe --config <path-to-config> run --input <events.jsonl>");
            return Ok(());
        }
    }

    // Fetch metrics
    let metrics_url = match metrics_url {
        Some(metrics_url) => metrics_url.trim_end_matches('/').to_string(),
        None => default_metrics_base(url),
    } + "/metrics";

    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(())
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    let status_emoji = match health.status.as_str() {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    };

    println!(
        "{} Overall Status: {} (HTTP {})",
        status_emoji,
        health.status.to_uppercase(),
        status_code
    );
    if health.pipeline_running {
        match health.uptime_seconds {
            Some(uptime) => println!("Pipeline running for {}s", uptime),
            None => println!("Pipeline running"),
        }
    } else {
        println!("Pipeline not running");
    }
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, status) in &health.components {
            let emoji = match status.status.as_str() {
                "healthy" => "[OK]",
                "degraded" => "[WARN]",
                "unhealthy" => "[FAIL]",
                _ => "[?]",
            };

            if let Some(msg) = &status.message {
                println!("  {} {}: {} ({})", emoji, name, status.status, msg);
            } else {
                println!("  {} {}: {}", emoji, name, status.status);
            }
        }
    }
}

fn print_metrics(metrics_text: &str) {
    // Parse Prometheus format and display nicely
    let mut values: HashMap<&str, u64> = HashMap::new();

    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        // Parse "metric_name value" format
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            if let Ok(value) = parts[1].parse::<u64>() {
                values.insert(parts[0], value);
            }
        }
    }

    let rows = [
        ("orderpipe_records_read_total", "Records Read:      "),
        ("orderpipe_records_filtered_out_total", "Filtered Out:      "),
        ("orderpipe_batches_total", "Batches:           "),
        ("orderpipe_events_published_total", "Events Published:  "),
        ("orderpipe_dead_letters_total", "Dead Letters:      "),
        ("orderpipe_routed_deliveries_total", "Sink Deliveries:   "),
        ("orderpipe_errors_total", "Errors:            "),
        ("orderpipe_in_flight_batches", "In-flight Batches: "),
        ("orderpipe_checkpoint_lag", "Checkpoint Lag:    "),
    ];
    for (metric, label) in rows {
        if let Some(v) = values.get(metric) {
            println!("{}{}", label, format_number(*v));
        }
    }

    if values.is_empty() {
        println!("No metrics available yet.");
    }
}

/// Health URL with its port swapped for the default metrics port.
fn default_metrics_base(health_url: &str) -> String {
    health_url
        .replace(":8080", ":9090")
        .replace("/health", "")
        .trim_end_matches('/')
        .to_string()
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
