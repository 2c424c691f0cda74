//! Orderpipe CLI - change-data-capture enrichment and routing pipeline.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use orderpipe_core::config::{LogFormat, StartingPosition};
use orderpipe_core::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, invalid rule, unknown sink)
    ConfigError = 1,
    /// Change stream error (malformed input, closed stage)
    StreamError = 2,
    /// Enrichment error that escaped per-record isolation
    EnrichmentError = 3,
    /// Publish retries exhausted
    PublishError = 4,
    /// Sink error
    SinkError = 5,
    /// Health check failure
    HealthCheckError = 6,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Convert an error to an exit code, preferring the pipeline error kind.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(error) = error.downcast_ref::<orderpipe_core::Error>() {
            use orderpipe_core::Error;
            return match error {
                Error::Config(_) | Error::Rule(_) => ExitCode::ConfigError,
                Error::Stream(_) | Error::Io(_) | Error::Serialization(_) => ExitCode::StreamError,
                Error::Enrichment(_) => ExitCode::EnrichmentError,
                Error::Publish(_) => ExitCode::PublishError,
                Error::Sink(_) => ExitCode::SinkError,
                Error::Shutdown => ExitCode::SignalInterrupt,
            };
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") || error_str.contains("parse")
        {
            ExitCode::ConfigError
        } else if error_str.contains("health") {
            ExitCode::HealthCheckError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "orderpipe")]
#[command(about = "Order change stream enrichment and routing CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Stream starting position.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum PositionArg {
    /// Only records appended after the reader opens
    Latest,
    /// Every record on the shard
    Earliest,
}

impl From<PositionArg> for StartingPosition {
    fn from(arg: PositionArg) -> Self {
        match arg {
            PositionArg::Latest => StartingPosition::Latest,
            PositionArg::Earliest => StartingPosition::Earliest,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over a JSON-lines change stream
    Run {
        /// Stream records, one per line ("-" for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Override the stream starting position
        #[arg(long, value_enum)]
        starting_position: Option<PositionArg>,

        /// Override the batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Keep the shard open after the input is consumed, until a signal arrives
        #[arg(long)]
        follow: bool,
    },

    /// Evaluate routing rules against a published event without delivering it
    Route {
        /// Event JSON file
        #[arg(short, long)]
        event: PathBuf,

        /// Deliver to the matched sinks as well
        #[arg(long)]
        deliver: bool,
    },

    /// Show status and health
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL (defaults to the health host on port 9090)
        #[arg(long)]
        metrics_url: Option<String>,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config file when it parses; JSON/info otherwise.
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);
    let log_format = monitoring
        .as_ref()
        .map(|m| m.log_format)
        .unwrap_or(LogFormat::Json);
    let log_level = monitoring
        .as_ref()
        .map(|m| m.log_level.as_filter())
        .unwrap_or("info");

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(log_level),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            input,
            starting_position,
            batch_size,
            follow,
        } => {
            let config = load_config(&cli.config)?;
            let overrides = commands::run::Overrides {
                starting_position: starting_position.map(Into::into),
                batch_size,
            };
            commands::run::run(config, &input, overrides, follow).await?;
        }

        Commands::Route { event, deliver } => {
            let config = load_config(&cli.config)?;
            commands::route::run(config, &event, deliver).await?;
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, metrics_url.as_deref()).await?;
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            commands::validate::run(&config);
        }
    }

    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("orderpipe.toml"));
    Ok(Config::from_file(&path)?)
}
