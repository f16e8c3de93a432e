//! Storage abstractions for scoring records
//!
//! Auto-scores are append-only: a later human rating may outweigh one, but
//! it is never overwritten. Durable backends live with the caller; the crate
//! ships an in-memory log.

use crate::error::Result;
use crate::evaluation::AutoScore;
use crate::types::{BucketKey, CandidateId};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Append-only log of auto-scores
#[async_trait]
pub trait AutoScoreLog: Send + Sync {
    /// Append a record
    async fn append(&self, score: AutoScore) -> Result<()>;

    /// All scores of one candidate, oldest first
    async fn for_candidate(&self, candidate: CandidateId) -> Result<Vec<AutoScore>>;

    /// All scores recorded for a bucket, oldest first
    async fn for_bucket(&self, bucket: &BucketKey) -> Result<Vec<AutoScore>>;

    /// Number of records
    async fn len(&self) -> Result<usize>;
}

/// In-memory auto-score log
#[derive(Debug, Default)]
pub struct InMemoryAutoScoreLog {
    records: RwLock<Vec<AutoScore>>,
}

impl InMemoryAutoScoreLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AutoScoreLog for InMemoryAutoScoreLog {
    async fn append(&self, score: AutoScore) -> Result<()> {
        self.records.write().await.push(score);
        Ok(())
    }

    async fn for_candidate(&self, candidate: CandidateId) -> Result<Vec<AutoScore>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|s| s.candidate_id == candidate)
            .cloned()
            .collect())
    }

    async fn for_bucket(&self, bucket: &BucketKey) -> Result<Vec<AutoScore>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|s| &s.bucket == bucket)
            .cloned()
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::DimensionScores;
    use chrono::Utc;
    use uuid::Uuid;

    fn score(candidate: CandidateId, bucket: BucketKey) -> AutoScore {
        AutoScore {
            id: Uuid::new_v4(),
            candidate_id: candidate,
            bucket,
            scores: DimensionScores {
                overall: 0.5,
                hook: 0.5,
                originality: 0.5,
                style_fit: 0.5,
                safety: 0.5,
                authenticity: None,
            },
            confidence: 0.8,
            reasoning: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let log = InMemoryAutoScoreLog::new();
        let candidate = CandidateId::new();
        let comedy = BucketKey::new("mia", "comedy");
        let vlog = BucketKey::new("mia", "vlog");

        log.append(score(candidate, comedy.clone())).await.unwrap();
        log.append(score(candidate, comedy.clone())).await.unwrap();
        log.append(score(CandidateId::new(), vlog.clone()))
            .await
            .unwrap();

        assert_eq!(log.len().await.unwrap(), 3);
        assert_eq!(log.for_candidate(candidate).await.unwrap().len(), 2);
        assert_eq!(log.for_bucket(&comedy).await.unwrap().len(), 2);
        assert_eq!(log.for_bucket(&vlog).await.unwrap().len(), 1);
    }
}
