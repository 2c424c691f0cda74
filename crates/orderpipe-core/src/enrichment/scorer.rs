//! Scoring capability.

use super::{ScoringRequest, MAX_SCORE, MIN_SCORE};
use crate::EnrichmentError;
use async_trait::async_trait;
use rand::Rng;

/// External decisioning service that scores one order.
///
/// Implementations may be slow or fail; the invoker applies deadlines and
/// validates that the returned score lies in [1, 100].
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score one order.
    async fn score(&self, request: &ScoringRequest) -> Result<i64, EnrichmentError>;

    /// Scorer name for logs.
    fn name(&self) -> &str {
        "scorer"
    }
}

/// Simulated scorer returning a uniform random integer in [1, 100].
#[derive(Debug, Clone, Default)]
pub struct RandomScorer;

impl RandomScorer {
    /// Create a random scorer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Scorer for RandomScorer {
    async fn score(&self, _request: &ScoringRequest) -> Result<i64, EnrichmentError> {
        Ok(rand::thread_rng().gen_range(MIN_SCORE..=MAX_SCORE))
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{EventData, OrderData};

    fn request() -> ScoringRequest {
        ScoringRequest {
            event_data: EventData {
                event_id: "1".into(),
                event_name: "INSERT".into(),
                approx_date_time: 0,
            },
            order_data: OrderData {
                order_number: "1000".into(),
                customer_name: "Ayla".into(),
                order_value: 10.0,
            },
        }
    }

    #[tokio::test]
    async fn test_random_scores_in_range() {
        let scorer = RandomScorer::new();
        for _ in 0..500 {
            let score = scorer.score(&request()).await.unwrap();
            assert!((1..=100).contains(&score));
        }
        assert_eq!(scorer.name(), "random");
    }
}
