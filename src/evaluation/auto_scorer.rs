//! Auto-scorer
//!
//! Sends a candidate to the judge under a timeout, retries transient
//! failures with exponential backoff, and parses the judge's JSON into
//! dimension scores. A malformed response leaves the candidate unscored:
//! it contributes no reward and is never auto-approved.

use crate::config::{ScoringConfig, MAX_JUDGE_BACKOFF};
use crate::error::{CalliopeError, Result};
use crate::evaluation::judge::Judge;
use crate::evaluation::reward::RewardSignal;
use crate::storage::AutoScoreLog;
use crate::types::{BucketKey, CandidateId, GeneratedCandidate, RetrievalContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Judge dimension scores, each in [0,1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub overall: f64,
    pub hook: f64,
    pub originality: f64,
    pub style_fit: f64,
    pub safety: f64,
    #[serde(default)]
    pub authenticity: Option<f64>,
}

/// Judge assessment of one candidate; append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScore {
    pub id: Uuid,
    pub candidate_id: CandidateId,
    pub bucket: BucketKey,
    pub scores: DimensionScores,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parsed body of a judge response
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    pub scores: DimensionScores,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// Why a candidate was not auto-approved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    Unscored,
    LowConfidence,
    LowOverall,
    LowSafety,
    CopyFlagged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum ApprovalDecision {
    AutoApproved,
    NeedsHumanReview(ReviewReason),
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::AutoApproved)
    }
}

/// Outcome of scoring one candidate in a batch
#[derive(Debug)]
pub struct ScoreOutcome {
    pub candidate_id: CandidateId,
    pub result: Result<AutoScore>,
}

const REQUIRED_KEYS: [&str; 6] = [
    "overall",
    "hook",
    "originality",
    "style_fit",
    "safety",
    "confidence",
];

/// Parse a judge response
///
/// Accepts a JSON object possibly wrapped in prose or a code fence. Each
/// `{` is tried in turn, so braces in leading prose do not hide the object.
pub fn parse_judge_response(raw: &str) -> Result<JudgeVerdict> {
    let mut first_error = None;
    let mut found = None;
    for (start, _) in raw.match_indices('{') {
        let mut values = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(Value::Object(object))) => {
                found = Some(object);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                first_error.get_or_insert(e);
            }
            None => {}
        }
    }

    let object = match (found, first_error) {
        (Some(object), _) => object,
        (None, Some(e)) => {
            return Err(CalliopeError::ScoreParse(format!("invalid JSON: {}", e)));
        }
        (None, None) => {
            return Err(CalliopeError::ScoreParse(
                "no JSON object in judge response".into(),
            ));
        }
    };
    let object = &object;

    for key in REQUIRED_KEYS {
        if !object.contains_key(key) {
            return Err(CalliopeError::ScoreParse(format!("missing key '{}'", key)));
        }
    }

    let authenticity = match object.get("authenticity") {
        None | Some(Value::Null) => None,
        Some(_) => Some(unit_field(object, "authenticity")?),
    };

    let reasoning = object
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(JudgeVerdict {
        scores: DimensionScores {
            overall: unit_field(object, "overall")?,
            hook: unit_field(object, "hook")?,
            originality: unit_field(object, "originality")?,
            style_fit: unit_field(object, "style_fit")?,
            safety: unit_field(object, "safety")?,
            authenticity,
        },
        confidence: unit_field(object, "confidence")?,
        reasoning,
    })
}

/// Exponential backoff before retry number `retry + 1`, capped
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(retry))
        .min(MAX_JUDGE_BACKOFF)
}

fn unit_field(object: &Map<String, Value>, key: &str) -> Result<f64> {
    let value = object
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| CalliopeError::ScoreParse(format!("'{}' is not a number", key)))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(CalliopeError::ScoreParse(format!(
            "'{}' = {} outside [0,1]",
            key, value
        )));
    }
    Ok(value)
}

/// Auto-scorer
pub struct AutoScorer {
    judge: Arc<dyn Judge>,
    log: Arc<dyn AutoScoreLog>,
    config: ScoringConfig,
}

impl AutoScorer {
    pub fn new(judge: Arc<dyn Judge>, log: Arc<dyn AutoScoreLog>, config: ScoringConfig) -> Self {
        Self { judge, log, config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one candidate and append the result to the log
    pub async fn score(
        &self,
        candidate: &GeneratedCandidate,
        context: &RetrievalContext,
    ) -> Result<AutoScore> {
        let raw = self.call_judge_with_retry(&candidate.text, context).await?;

        let verdict = match parse_judge_response(&raw) {
            Ok(verdict) => verdict,
            Err(e) => {
                let excerpt: String = raw.chars().take(200).collect();
                warn!(
                    "Unscored candidate {}: {} (response: {:?})",
                    candidate.id, e, excerpt
                );
                return Err(e);
            }
        };

        let score = AutoScore {
            id: Uuid::new_v4(),
            candidate_id: candidate.id,
            bucket: context.bucket(),
            scores: verdict.scores,
            confidence: verdict.confidence,
            reasoning: verdict.reasoning,
            created_at: Utc::now(),
        };

        self.log.append(score.clone()).await?;
        debug!(
            "Scored candidate {}: overall {:.2}, confidence {:.2}",
            candidate.id, score.scores.overall, score.confidence
        );
        Ok(score)
    }

    /// Score several candidates; one failure does not abort the rest
    pub async fn score_batch(
        &self,
        candidates: &[GeneratedCandidate],
        context: &RetrievalContext,
    ) -> Vec<ScoreOutcome> {
        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            outcomes.push(ScoreOutcome {
                candidate_id: candidate.id,
                result: self.score(candidate, context).await,
            });
        }

        let scored = outcomes.iter().filter(|o| o.result.is_ok()).count();
        info!(
            "Scored {}/{} candidates for {}",
            scored,
            outcomes.len(),
            context.bucket()
        );
        outcomes
    }

    /// Reward for the learner, `None` below the confidence floor
    pub fn reward(&self, score: &AutoScore) -> Option<RewardSignal> {
        let reward = RewardSignal::from_auto(score, &self.config);
        if reward.is_none() {
            debug!(
                "Score {} below confidence floor ({:.2} < {:.2}), excluded from reward",
                score.id, score.confidence, self.config.confidence_floor
            );
        }
        reward
    }

    /// Auto-approval decision for a possibly missing score
    pub fn approval(&self, score: Option<&AutoScore>) -> ApprovalDecision {
        let Some(score) = score else {
            return ApprovalDecision::NeedsHumanReview(ReviewReason::Unscored);
        };
        if score.confidence < self.config.confidence_floor {
            ApprovalDecision::NeedsHumanReview(ReviewReason::LowConfidence)
        } else if score.scores.overall < self.config.approval_min_overall {
            ApprovalDecision::NeedsHumanReview(ReviewReason::LowOverall)
        } else if score.scores.safety < self.config.approval_min_safety {
            ApprovalDecision::NeedsHumanReview(ReviewReason::LowSafety)
        } else {
            ApprovalDecision::AutoApproved
        }
    }

    async fn call_judge_with_retry(
        &self,
        candidate: &str,
        context: &RetrievalContext,
    ) -> Result<String> {
        let mut retries = 0;

        loop {
            match self.call_judge(candidate, context).await {
                Ok(raw) => return Ok(raw),
                Err(e) => {
                    if retries >= self.config.judge_max_retries || !e.is_transient() {
                        return Err(e);
                    }

                    let backoff = backoff_delay(self.config.judge_backoff_base, retries);
                    warn!(
                        "Judge call failed ({}), retrying after {}ms (attempt {}/{})",
                        e,
                        backoff.as_millis(),
                        retries + 1,
                        self.config.judge_max_retries
                    );

                    sleep(backoff).await;
                    retries += 1;
                }
            }
        }
    }

    async fn call_judge(&self, candidate: &str, context: &RetrievalContext) -> Result<String> {
        let deadline: Duration = self.config.judge_timeout;
        match timeout(deadline, self.judge.judge(candidate, context)).await {
            Ok(result) => result,
            Err(_) => Err(CalliopeError::JudgeTimeout(deadline.as_millis() as u64)),
        }
    }
}
