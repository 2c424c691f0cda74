//! Bounded-concurrency enrichment of one batch.

use super::{EnrichmentOutcome, Scorer, ScoringRequest, MAX_SCORE, MIN_SCORE};
use crate::batch::Batch;
use crate::config::EnrichmentConfig;
use crate::metrics::{ErrorType, PipelineMetrics};
use crate::record::ChangeRecord;
use crate::EnrichmentError;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Aborts a spawned scoring call when its caller stops waiting for it.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one scoring call per record, at most `max_concurrency` at a time.
///
/// Outcomes are aligned index-for-index with the batch records. A failing,
/// panicking or slow call only affects its own record.
#[derive(Clone)]
pub struct EnrichmentInvoker {
    scorer: Arc<dyn Scorer>,
    max_concurrency: usize,
    call_timeout: Duration,
    batch_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl EnrichmentInvoker {
    /// Create an invoker.
    pub fn new(
        scorer: Arc<dyn Scorer>,
        config: &EnrichmentConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            scorer,
            max_concurrency: config.max_concurrency.max(1),
            call_timeout: config.call_timeout(),
            batch_timeout: config.batch_timeout(),
            metrics,
        }
    }

    /// Enrich every record of a batch.
    pub async fn enrich(&self, batch: &Batch) -> Vec<EnrichmentOutcome> {
        let started = Instant::now();
        let total = batch.len();
        self.metrics.record_enrichment_calls(total);

        let mut outcomes: Vec<Option<EnrichmentOutcome>> = vec![None; total];
        let mut calls = futures::stream::iter(batch.records.iter().cloned().enumerate())
            .map(|(index, record)| {
                let invoker = self.clone();
                async move { (index, invoker.enrich_one(record).await) }
            })
            .buffer_unordered(self.max_concurrency);

        let deadline = tokio::time::sleep(self.batch_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = calls.next() => match next {
                    Some((index, outcome)) => outcomes[index] = Some(outcome),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        batch_id = %batch.batch_id,
                        timeout_ms = self.batch_timeout.as_millis() as u64,
                        "Batch invocation deadline exceeded"
                    );
                    break;
                }
            }
        }
        // Cancels scoring calls still running past the deadline.
        drop(calls);

        let batch_timeout = self.batch_timeout;
        let outcomes: Vec<EnrichmentOutcome> = outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or(EnrichmentOutcome::Failed {
                    error: EnrichmentError::Timeout(batch_timeout),
                })
            })
            .collect();

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        for _ in 0..failed {
            self.metrics.record_error(ErrorType::Enrichment);
        }
        self.metrics.record_enrichment_duration(started.elapsed());

        debug!(
            batch_id = %batch.batch_id,
            size = total,
            failed,
            scorer = self.scorer.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch enriched"
        );

        outcomes
    }

    async fn enrich_one(self, record: ChangeRecord) -> EnrichmentOutcome {
        let request = match ScoringRequest::from_record(&record) {
            Ok(request) => request,
            Err(error) => return EnrichmentOutcome::Failed { error },
        };

        let scorer = self.scorer.clone();
        let call_timeout = self.call_timeout;
        let mut call = tokio::spawn(async move {
            tokio::time::timeout(call_timeout, scorer.score(&request)).await
        });
        let _abort = AbortOnDrop(call.abort_handle());

        let result = match (&mut call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EnrichmentError::Timeout(call_timeout)),
            Err(join_error) => Err(EnrichmentError::Aborted(join_error.to_string())),
        };

        match result {
            Ok(score) if (MIN_SCORE..=MAX_SCORE).contains(&score) => EnrichmentOutcome::Scored {
                score: score as u8,
            },
            Ok(score) => EnrichmentOutcome::Failed {
                error: EnrichmentError::OutOfRange(score),
            },
            Err(error) => {
                debug!(
                    sequence_id = record.sequence_id,
                    event_id = %record.event_id,
                    error = %error,
                    "Scoring call failed"
                );
                EnrichmentOutcome::Failed { error }
            }
        }
    }
}
