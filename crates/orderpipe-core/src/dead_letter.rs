//! Dead-letter path for records that exhaust enrichment retries.

use crate::record::ChangeRecord;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

/// A record that failed enrichment at the smallest retry granularity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    /// The failed record
    pub record: ChangeRecord,
    /// Last failure reason
    pub reason: String,
    /// Enrichment invocations the record went through
    pub attempts: u32,
    /// Batch (or sub-batch) in which the record failed last
    pub batch_id: String,
    /// When the record was dead-lettered
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Create a dead letter stamped with the current time.
    pub fn new(
        record: ChangeRecord,
        reason: impl Into<String>,
        attempts: u32,
        batch_id: impl Into<String>,
    ) -> Self {
        Self {
            record,
            reason: reason.into(),
            attempts,
            batch_id: batch_id.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Terminal destination for dead letters.
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Store one dead letter.
    async fn send(&self, letter: DeadLetter) -> Result<()>;

    /// Number of stored dead letters.
    fn len(&self) -> usize;

    /// Whether the queue is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory dead-letter queue.
#[derive(Default)]
pub struct InMemoryDeadLetterQueue {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored dead letter.
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters.lock().clone()
    }

    /// Remove and return every stored dead letter.
    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.letters.lock())
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn send(&self, letter: DeadLetter) -> Result<()> {
        warn!(
            sequence_id = letter.record.sequence_id,
            event_id = %letter.record.event_id,
            batch_id = %letter.batch_id,
            attempts = letter.attempts,
            reason = %letter.reason,
            "Record dead-lettered"
        );
        self.letters.lock().push(letter);
        Ok(())
    }

    fn len(&self) -> usize {
        self.letters.lock().len()
    }
}
