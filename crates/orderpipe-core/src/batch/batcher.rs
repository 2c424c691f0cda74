//! Size- and time-triggered batching.

use super::Batch;
use crate::config::BatchConfig;
use crate::metrics::PipelineMetrics;
use crate::record::ChangeRecord;
use crate::{Result, StreamError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Groups records into batches, flushing on size or on timeout.
///
/// The flush timeout is measured from the first record of the pending batch.
pub struct Batcher {
    batch_size: usize,
    flush_timeout: Duration,
    pending: Vec<ChangeRecord>,
    first_record_at: Option<Instant>,
}

impl Batcher {
    /// Create a batcher.
    pub fn new(batch_size: usize, flush_timeout: Duration) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            flush_timeout,
            pending: Vec::with_capacity(batch_size),
            first_record_at: None,
        }
    }

    /// Create a batcher from configuration.
    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.batch_size, config.flush_timeout())
    }

    /// Add a record. Returns a full batch once `batch_size` is reached.
    pub fn push(&mut self, record: ChangeRecord) -> Option<Batch> {
        if self.pending.is_empty() {
            self.first_record_at = Some(Instant::now());
        }
        self.pending.push(record);

        if self.pending.len() >= self.batch_size {
            self.take_batch()
        } else {
            None
        }
    }

    /// Whether the pending batch has waited past the flush timeout.
    pub fn should_flush(&self) -> bool {
        self.deadline().is_some_and(|d| Instant::now() >= d)
    }

    /// When the pending batch must be flushed, if any is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.first_record_at.map(|t| t + self.flush_timeout)
    }

    /// Take the pending records as a batch.
    pub fn take_batch(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        self.first_record_at = None;
        let records = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        Some(Batch::new(records, self.batch_size))
    }

    /// Records waiting for a flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Run the batching stage until the input closes.
    ///
    /// Sending on the bounded output blocks while downstream is saturated,
    /// which in turn stops this stage from draining its input. Remaining
    /// records are flushed when the input closes.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<ChangeRecord>,
        output: mpsc::Sender<Batch>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<()> {
        info!(
            batch_size = self.batch_size,
            flush_timeout_ms = self.flush_timeout.as_millis() as u64,
            "Batcher started"
        );

        loop {
            let deadline = self.deadline();
            let flush_timer = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let batch = tokio::select! {
                received = input.recv() => match received {
                    Some(record) => self.push(record),
                    None => break,
                },
                _ = flush_timer => {
                    debug!(pending = self.pending.len(), "Flush timeout reached");
                    self.take_batch()
                }
            };

            if let Some(batch) = batch {
                Self::emit(&output, batch, &metrics).await?;
            }
        }

        if let Some(batch) = self.take_batch() {
            Self::emit(&output, batch, &metrics).await?;
        }

        info!("Batcher input closed, stopping");
        Ok(())
    }

    async fn emit(
        output: &mpsc::Sender<Batch>,
        batch: Batch,
        metrics: &PipelineMetrics,
    ) -> Result<()> {
        debug!(
            batch_id = %batch.batch_id,
            size = batch.len(),
            "Emitting batch"
        );
        metrics.record_batch();
        output
            .send(batch)
            .await
            .map_err(|_| StreamError::StageClosed("enrichment").into())
    }
}
