//! Sequence tracking for stream shards.
//!
//! Batches finish out of order, so the committed position only advances over
//! a contiguous run of completed sequence ids. Persisting tokens is left to
//! the caller.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Position in a shard from which a reader can resume.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CheckpointToken {
    /// Shard identifier
    pub shard_id: String,
    /// Last sequence id covered by the checkpoint
    pub sequence_id: u64,
}

/// Read/commit progress for one shard.
#[derive(Debug, Clone, Default)]
pub struct ShardProgress {
    /// Highest sequence id handed to the pipeline
    pub last_read: u64,
    /// Every sequence id up to and including this one is fully accounted for
    pub committed: u64,
    /// Completed ids above the committed watermark
    pending: BTreeSet<u64>,
}

impl ShardProgress {
    fn start_at(&mut self, sequence_id: u64) {
        self.last_read = self.last_read.max(sequence_id);
        if sequence_id > self.committed {
            self.committed = sequence_id;
            self.pending = self.pending.split_off(&(sequence_id + 1));
            while self.pending.remove(&(self.committed + 1)) {
                self.committed += 1;
            }
        }
    }

    fn complete(&mut self, sequence_id: u64) {
        if sequence_id <= self.committed {
            return;
        }
        self.pending.insert(sequence_id);
        while self.pending.remove(&(self.committed + 1)) {
            self.committed += 1;
        }
    }
}

/// Tracks read and completed sequence ids per shard.
pub struct SequenceTracker {
    shards: DashMap<String, ShardProgress>,
}

impl SequenceTracker {
    /// Create a new tracker.
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
        }
    }

    /// Start tracking a shard from a reader position: every sequence id up to
    /// and including `sequence_id` counts as committed.
    pub fn start(&self, shard_id: &str, sequence_id: u64) {
        self.shards
            .entry(shard_id.to_string())
            .or_default()
            .start_at(sequence_id);
    }

    /// Record that a sequence id was read from a shard.
    pub fn mark_read(&self, shard_id: &str, sequence_id: u64) {
        let mut progress = self.shards.entry(shard_id.to_string()).or_default();
        progress.last_read = progress.last_read.max(sequence_id);
    }

    /// Record that a sequence id reached a terminal outcome.
    pub fn mark_completed(&self, shard_id: &str, sequence_id: u64) {
        self.shards
            .entry(shard_id.to_string())
            .or_default()
            .complete(sequence_id);
    }

    /// Record several completed sequence ids.
    pub fn mark_all_completed(&self, shard_id: &str, sequence_ids: impl IntoIterator<Item = u64>) {
        let mut progress = self.shards.entry(shard_id.to_string()).or_default();
        for sequence_id in sequence_ids {
            progress.complete(sequence_id);
        }
    }

    /// Checkpoint covering every completed record of a shard.
    pub fn checkpoint(&self, shard_id: &str) -> Option<CheckpointToken> {
        let progress = self.shards.get(shard_id)?;
        if progress.committed == 0 {
            return None;
        }
        Some(CheckpointToken {
            shard_id: shard_id.to_string(),
            sequence_id: progress.committed,
        })
    }

    /// Records read but not yet committed.
    pub fn lag(&self, shard_id: &str) -> Option<u64> {
        self.shards
            .get(shard_id)
            .map(|p| p.last_read.saturating_sub(p.committed))
    }

    /// Progress snapshot for a shard.
    pub fn progress(&self, shard_id: &str) -> Option<ShardProgress> {
        self.shards.get(shard_id).map(|p| p.clone())
    }

    /// Get all tracked shards.
    pub fn shard_ids(&self) -> Vec<String> {
        self.shards.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
