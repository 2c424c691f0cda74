//! Pipeline engine.
//!
//! Wires the staged pipeline together:
//! stream reader -> filter -> batcher -> enrichment (with bisection) ->
//! publisher -> bus -> router -> sinks.

mod pipeline;

pub use pipeline::{Pipeline, PipelineReport};
