//! Ordered change stream reading.
//!
//! A [`StreamShard`] is an append-only, per-partition ordered log of change
//! records. Readers are positioned at EARLIEST, LATEST or after a
//! [`CheckpointToken`] and wait for new records until the shard is closed.

mod checkpoint;
mod loader;
mod shard;

pub use checkpoint::{CheckpointToken, SequenceTracker, ShardProgress};
pub use loader::{load_json_lines, parse_json_lines};
pub use shard::{ShardReader, StreamReader, StreamShard};
