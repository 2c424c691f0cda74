//! Partial-batch failure handling by recursive bisection.
//!
//! After an invocation, successful records are kept and only the failed subset
//! is split (ceil/floor) into two child batches that are invoked again. A
//! failed batch of size one is dead-lettered. Records that succeeded are never
//! re-invoked.

use super::{EnrichedRecord, EnrichmentInvoker, EnrichmentOutcome};
use crate::batch::Batch;
use crate::config::PartialFailurePolicy;
use crate::dead_letter::DeadLetter;
use crate::metrics::PipelineMetrics;
use crate::record::ChangeRecord;
use crate::EnrichmentError;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Final resolution of one batch: every record is either enriched or dead-lettered.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Root batch id
    pub batch_id: String,
    /// Successfully scored records
    pub enriched: Vec<EnrichedRecord>,
    /// Records that exhausted retries
    pub dead_letters: Vec<DeadLetter>,
    /// Invocations made, including the first one
    pub invocations: usize,
}

impl BatchOutcome {
    fn new(batch_id: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            ..Self::default()
        }
    }

    fn merge(&mut self, other: BatchOutcome) {
        self.enriched.extend(other.enriched);
        self.dead_letters.extend(other.dead_letters);
        self.invocations += other.invocations;
    }

    /// Records accounted for.
    pub fn total(&self) -> usize {
        self.enriched.len() + self.dead_letters.len()
    }
}

/// Resolves a batch through the invoker, bisecting failed subsets.
pub struct BisectRetrier {
    invoker: EnrichmentInvoker,
    policy: PartialFailurePolicy,
    metrics: Arc<PipelineMetrics>,
}

impl BisectRetrier {
    /// Create a retrier.
    pub fn new(
        invoker: EnrichmentInvoker,
        policy: PartialFailurePolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            invoker,
            policy,
            metrics,
        }
    }

    /// Enrich a batch until every record is resolved.
    ///
    /// Enriched records come back in the batch's arrival order.
    pub async fn process(&self, batch: Batch) -> BatchOutcome {
        let batch_id = batch.batch_id.clone();
        let size = batch.len();
        let order: Vec<u64> = batch.sequence_ids();

        let mut outcome = self.resolve(batch, 1).await;
        outcome.batch_id = batch_id;
        outcome.enriched.sort_by_key(|enriched| {
            order
                .iter()
                .position(|seq| *seq == enriched.record.sequence_id)
                .unwrap_or(usize::MAX)
        });
        self.metrics.record_dead_letters(outcome.dead_letters.len());

        if outcome.dead_letters.is_empty() {
            debug!(
                batch_id = %outcome.batch_id,
                size,
                invocations = outcome.invocations,
                "Batch fully enriched"
            );
        } else {
            info!(
                batch_id = %outcome.batch_id,
                size,
                enriched = outcome.enriched.len(),
                dead_lettered = outcome.dead_letters.len(),
                invocations = outcome.invocations,
                "Batch resolved with dead letters"
            );
        }

        outcome
    }

    fn resolve(&self, batch: Batch, attempt: u32) -> BoxFuture<'_, BatchOutcome> {
        async move {
            let outcomes = self.invoker.enrich(&batch).await;

            let mut result = BatchOutcome::new(&batch.batch_id);
            result.invocations = 1;

            let mut failed: Vec<(ChangeRecord, EnrichmentError)> = Vec::new();
            for (record, outcome) in batch.records.iter().cloned().zip(outcomes) {
                match outcome {
                    EnrichmentOutcome::Failed { error } => failed.push((record, error)),
                    scored => result.enriched.push(EnrichedRecord::new(record, scored)),
                }
            }

            if failed.is_empty() {
                return result;
            }

            if self.policy == PartialFailurePolicy::Stop || batch.len() == 1 {
                for (record, error) in failed {
                    result.dead_letters.push(DeadLetter::new(
                        record,
                        error.to_string(),
                        attempt,
                        batch.batch_id.as_str(),
                    ));
                }
                return result;
            }

            let failed_records: Vec<ChangeRecord> =
                failed.into_iter().map(|(record, _)| record).collect();
            let (left, right) = failed_records.split_at(failed_records.len().div_ceil(2));
            self.metrics.record_bisect_split();
            debug!(
                batch_id = %batch.batch_id,
                failed = failed_records.len(),
                left = left.len(),
                right = right.len(),
                "Bisecting failed subset"
            );

            let halves = [left, right]
                .into_iter()
                .enumerate()
                .filter(|(_, half)| !half.is_empty())
                .map(|(index, half)| self.resolve(batch.child(index, half.to_vec()), attempt + 1));

            for resolved in join_all(halves).await {
                result.merge(resolved);
            }
            result
        }
        .boxed()
    }
}
