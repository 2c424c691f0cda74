//! Orderpipe Core - change-data-capture enrichment and routing pipeline
//!
//! This library consumes an ordered stream of record-store mutations and:
//!
//! - Filters them to INSERTs carrying the expected typed fields
//! - Groups them into bounded batches (size or flush timeout)
//! - Scores each record with bounded concurrency, bisecting failed subsets
//!   down to single records before dead-lettering them
//! - Publishes enriched events onto a multi-consumer bus
//! - Routes every event to the union of sinks whose rules match

pub mod batch;
pub mod bus;
pub mod config;
pub mod dead_letter;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod event;
pub mod filter;
pub mod health;
pub mod metrics;
pub mod publisher;
pub mod record;
pub mod retry;
pub mod routing;
pub mod stream;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Pipeline, PipelineReport};
pub use error::{EnrichmentError, PublishError, RuleError, SinkError, StreamError};
pub use error::{Error, Result};
