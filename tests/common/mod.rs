//! Common test utilities and helpers
#![allow(dead_code)]

use async_trait::async_trait;
use calliope_core::{
    config::{EngineConfig, LearnerConfig, ScoringConfig},
    error::{CalliopeError, Result},
    policy::{PolicyRecord, PolicyStore},
    retrieval::ExemplarPack,
    services::Generator,
    types::{BucketKey, GeneratedCandidate, QualitySignal, ReferenceItem, RetrievalContext},
    Judge,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

/// A judge response every stub can return
pub fn judge_json(overall: f64, safety: f64, confidence: f64) -> String {
    format!(
        r#"{{"overall": {overall}, "hook": 0.8, "originality": 0.7, "style_fit": 0.75, "safety": {safety}, "confidence": {confidence}, "reasoning": "stub"}}"#
    )
}

/// Judge returning the same response for every candidate
pub struct StubJudge {
    response: String,
    pub calls: AtomicUsize,
}

impl StubJudge {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn approving() -> Self {
        Self::new(judge_json(0.9, 0.95, 0.9))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Judge for StubJudge {
    async fn judge(&self, _candidate: &str, _context: &RetrievalContext) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Judge answering by the first matching substring of the candidate
pub struct ScriptedJudge {
    pub responses: Vec<(String, String)>,
    pub fallback: String,
}

impl ScriptedJudge {
    pub fn new(responses: &[(&str, String)], fallback: impl Into<String>) -> Self {
        Self {
            responses: responses
                .iter()
                .map(|(needle, response)| (needle.to_string(), response.clone()))
                .collect(),
            fallback: fallback.into(),
        }
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn judge(&self, candidate: &str, _context: &RetrievalContext) -> Result<String> {
        Ok(self
            .responses
            .iter()
            .find(|(needle, _)| candidate.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Judge that is always down
pub struct UnavailableJudge {
    pub calls: AtomicUsize,
}

impl UnavailableJudge {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Judge for UnavailableJudge {
    async fn judge(&self, _candidate: &str, _context: &RetrievalContext) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CalliopeError::JudgeUnavailable("stub outage".to_string()))
    }
}

/// Judge that answers only after a delay
pub struct SlowJudge {
    pub delay: StdDuration,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Judge for SlowJudge {
    async fn judge(&self, _candidate: &str, _context: &RetrievalContext) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(judge_json(0.9, 0.9, 0.9))
    }
}

/// Policy store that loses every compare-and-swap race
pub struct ContendedPolicyStore {
    pub swaps: AtomicUsize,
}

impl ContendedPolicyStore {
    pub fn new() -> Self {
        Self {
            swaps: AtomicUsize::new(0),
        }
    }
}

impl PolicyStore for ContendedPolicyStore {
    fn load(&self, _bucket: &BucketKey) -> Result<Option<PolicyRecord>> {
        Ok(None)
    }

    fn compare_and_swap(&self, _expected: Option<u64>, _record: PolicyRecord) -> Result<bool> {
        self.swaps.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    fn list(&self) -> Result<Vec<PolicyRecord>> {
        Ok(Vec::new())
    }
}

/// Generator returning fixed texts at every temperature
pub struct StubGenerator {
    pub texts: Vec<String>,
}

impl StubGenerator {
    pub fn new(texts: &[&str]) -> Self {
        Self {
            texts: texts.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(
        &self,
        _pack: &ExemplarPack,
        _context: &RetrievalContext,
        _temperature: f64,
    ) -> Result<Vec<GeneratedCandidate>> {
        Ok(self
            .texts
            .iter()
            .map(|t| GeneratedCandidate::new(t.clone()))
            .collect())
    }
}

/// Generator that copies the top exemplar verbatim
pub struct CopyingGenerator;

#[async_trait]
impl Generator for CopyingGenerator {
    async fn generate(
        &self,
        pack: &ExemplarPack,
        _context: &RetrievalContext,
        _temperature: f64,
    ) -> Result<Vec<GeneratedCandidate>> {
        let top = pack
            .entries
            .first()
            .ok_or_else(|| CalliopeError::Generation("empty pack".to_string()))?;
        Ok(vec![GeneratedCandidate::new(top.text.clone())])
    }
}

/// Generator that always fails
pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(
        &self,
        _pack: &ExemplarPack,
        _context: &RetrievalContext,
        _temperature: f64,
    ) -> Result<Vec<GeneratedCandidate>> {
        Err(CalliopeError::Generation("model overloaded".to_string()))
    }
}

/// Deterministic config with fast judge retries
pub fn test_config() -> EngineConfig {
    EngineConfig {
        scoring: ScoringConfig {
            judge_timeout: StdDuration::from_millis(100),
            judge_backoff_base: StdDuration::from_millis(1),
            judge_max_retries: 2,
            ..ScoringConfig::default()
        },
        learner: LearnerConfig {
            seed: Some(7),
            ..LearnerConfig::default()
        },
        ..EngineConfig::default()
    }
}

pub fn context() -> RetrievalContext {
    RetrievalContext::new("mia", "comedy")
}

/// Reference item with a `Full` fragment, `age_days` old, rated `count` times
pub fn item(text: &str, now: DateTime<Utc>, age_days: i64, count: u32, rating: f64) -> ReferenceItem {
    let mut item = ReferenceItem::with_text(text, now - Duration::days(age_days));
    item.quality = QualitySignal::uniform(count, rating);
    item
}

/// Small pool of distinct comedy references
pub fn comedy_pool(now: DateTime<Utc>) -> Vec<ReferenceItem> {
    vec![
        item("my cat judging my workout form from the couch", now, 1, 4, 4.5),
        item("when the barista writes a completely different name on the cup", now, 3, 10, 4.8),
        item("pov you try a viral pasta recipe and set off the smoke alarm", now, 10, 0, 0.0),
        item("explaining memes to my grandmother over video call", now, 30, 2, 3.5),
        item("the gym mirror selfie that went horribly wrong", now, 60, 20, 4.9),
    ]
}
