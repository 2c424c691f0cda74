//! In-process stream shard and its readers.

use super::CheckpointToken;
use crate::config::StartingPosition;
use crate::record::ChangeRecord;
use crate::{Result, StreamError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Pull-based reader over an ordered change stream.
#[async_trait]
pub trait StreamReader: Send {
    /// Read the next record, waiting for one to arrive.
    ///
    /// Returns `None` at end-of-stream.
    async fn next(&mut self) -> Option<ChangeRecord>;

    /// Position this reader has consumed up to. Before the first read this
    /// is its starting position; `None` when it starts at the shard head.
    fn checkpoint(&self) -> Option<CheckpointToken>;

    /// Shard this reader consumes.
    fn shard_id(&self) -> &str;
}

struct ShardInner {
    id: String,
    records: RwLock<Vec<ChangeRecord>>,
    closed: AtomicBool,
    notify: Notify,
}

/// Append-only ordered log of change records for one partition.
///
/// Cloning is cheap and yields another handle to the same shard.
#[derive(Clone)]
pub struct StreamShard {
    inner: Arc<ShardInner>,
}

impl StreamShard {
    /// Create an empty open shard.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ShardInner {
                id: id.into(),
                records: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Shard identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Append a record, stamping its sequence id. Sequence ids start at 1.
    pub fn append(&self, record: ChangeRecord) -> Result<u64> {
        if self.is_closed() {
            return Err(StreamError::ShardClosed(self.inner.id.clone()).into());
        }

        let sequence_id = {
            let mut records = self.inner.records.write();
            let sequence_id = records.len() as u64 + 1;
            records.push(record.with_sequence(sequence_id));
            sequence_id
        };

        self.inner.notify.notify_waiters();
        Ok(sequence_id)
    }

    /// Append several records in order.
    pub fn append_all(&self, records: impl IntoIterator<Item = ChangeRecord>) -> Result<u64> {
        let mut last = 0;
        for record in records {
            last = self.append(record)?;
        }
        Ok(last)
    }

    /// Close the shard. Readers drain what is left and then see end-of-stream.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!(shard = %self.inner.id, "Stream shard closed");
        }
        self.inner.notify.notify_waiters();
    }

    /// Whether the shard is closed for appends.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Whether no record was ever appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a reader at a starting position.
    ///
    /// LATEST is resolved now: only records appended after this call are read.
    pub fn reader(&self, position: StartingPosition) -> ShardReader {
        let cursor = match position {
            StartingPosition::Earliest => 0,
            StartingPosition::Latest => self.len(),
        };
        debug!(shard = %self.inner.id, ?position, cursor, "Opened shard reader");
        ShardReader {
            shard: self.clone(),
            cursor,
        }
    }

    /// Open a reader that resumes after a checkpoint.
    pub fn reader_after(&self, token: &CheckpointToken) -> ShardReader {
        let cursor = (token.sequence_id as usize).min(self.len());
        ShardReader {
            shard: self.clone(),
            cursor,
        }
    }

    fn get(&self, index: usize) -> Option<ChangeRecord> {
        self.inner.records.read().get(index).cloned()
    }
}

/// Reader over a [`StreamShard`]. Reading only advances its own cursor.
pub struct ShardReader {
    shard: StreamShard,
    cursor: usize,
}

impl ShardReader {
    /// Read the next record if one is already available.
    pub fn try_next(&mut self) -> Option<ChangeRecord> {
        let record = self.shard.get(self.cursor)?;
        self.cursor += 1;
        Some(record)
    }

    /// Records appended but not yet read.
    pub fn remaining(&self) -> usize {
        self.shard.len().saturating_sub(self.cursor)
    }
}

#[async_trait]
impl StreamReader for ShardReader {
    async fn next(&mut self) -> Option<ChangeRecord> {
        let shard = self.shard.clone();
        loop {
            let notified = shard.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an append between check and await is not missed.
            notified.as_mut().enable();

            if let Some(record) = self.try_next() {
                return Some(record);
            }
            if shard.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    fn checkpoint(&self) -> Option<CheckpointToken> {
        if self.cursor == 0 {
            return None;
        }
        Some(CheckpointToken {
            shard_id: self.shard.id().to_string(),
            sequence_id: self.cursor as u64,
        })
    }

    fn shard_id(&self) -> &str {
        self.shard.id()
    }
}
