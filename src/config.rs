//! Engine configuration
//!
//! Every tunable of the ranking, copy-detection, scoring and learning
//! pipeline lives in one explicit structure. Defaults come from the named
//! process-wide constants below, so a missing section or field in the TOML
//! file always resolves to the documented value.

use crate::error::{CalliopeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Global mean rating used as the shrinkage prior (1-5 scale)
pub const GLOBAL_MEAN_RATING: f64 = 4.2;

/// Lowest accepted human rating
pub const RATING_SCALE_MIN: f64 = 1.0;

/// Highest accepted human rating; shrunk quality is divided by this
pub const RATING_SCALE_MAX: f64 = 5.0;

/// Pseudo-count of the global prior in Bayesian shrinkage
pub const SHRINKAGE_PRIOR_STRENGTH: f64 = 10.0;

/// Decay constant (days) of the freshness signal
pub const FRESHNESS_DECAY_DAYS: f64 = 28.0;

/// Component score used when a normalizer has nothing to compare against
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Cosine similarity at or above which generated text counts as copied
pub const COPY_THRESHOLD: f64 = 0.92;

/// Copy similarity at or above which a rewrite is critical
pub const CRITICAL_COPY_THRESHOLD: f64 = 0.95;

/// Pairwise exemplar similarity above which a candidate is redundant
pub const NEAR_DUPLICATE_THRESHOLD: f64 = 0.95;

/// Default number of exemplars in a pack
pub const DEFAULT_PACK_SIZE: usize = 8;

/// Judge confidence below which a score earns no reward
pub const CONFIDENCE_FLOOR: f64 = 0.7;

/// Upper bound on judge retries accepted by validation
pub const MAX_JUDGE_RETRIES: u32 = 10;

/// Longest single backoff between judge retries
pub const MAX_JUDGE_BACKOFF: Duration = Duration::from_secs(60);

/// Step size of the exploitation update
pub const LEARNING_RATE: f64 = 0.1;

/// Exploration rate while a bucket is exploring
pub const EPSILON_INITIAL: f64 = 0.2;

/// Per-update geometric decay of epsilon while converging
pub const EPSILON_DECAY: f64 = 0.99;

/// Exploration floor
pub const EPSILON_MIN: f64 = 0.05;

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub normalization: NormalizationConfig,
    pub ranking: RankingConfig,
    pub copy_guard: CopyGuardConfig,
    pub scoring: ScoringConfig,
    pub judge: JudgeConfig,
    pub embedder: EmbedderConfig,
    pub learner: LearnerConfig,
}

/// Score normalizer constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub global_mean_rating: f64,
    pub rating_scale_max: f64,
    pub shrinkage_prior_strength: f64,
    pub freshness_decay_days: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            global_mean_rating: GLOBAL_MEAN_RATING,
            rating_scale_max: RATING_SCALE_MAX,
            shrinkage_prior_strength: SHRINKAGE_PRIOR_STRENGTH,
            freshness_decay_days: FRESHNESS_DECAY_DAYS,
        }
    }
}

/// Hybrid ranker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Maximum exemplars per pack
    pub pack_size: usize,

    /// Pairwise similarity above which a candidate is skipped
    pub near_duplicate_threshold: f64,

    /// BM25 term-frequency saturation
    pub bm25_k1: f64,

    /// BM25 length normalization
    pub bm25_b: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            pack_size: DEFAULT_PACK_SIZE,
            near_duplicate_threshold: NEAR_DUPLICATE_THRESHOLD,
            bm25_k1: 1.2,
            bm25_b: 0.75,
        }
    }
}

/// Anti-copy guard settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyGuardConfig {
    pub threshold: f64,
    pub critical_threshold: f64,

    /// Candidates shorter than this are never flagged
    pub min_candidate_chars: usize,
}

impl Default for CopyGuardConfig {
    fn default() -> Self {
        Self {
            threshold: COPY_THRESHOLD,
            critical_threshold: CRITICAL_COPY_THRESHOLD,
            min_candidate_chars: 10,
        }
    }
}

/// Relative weight of each judged dimension in the reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardWeights {
    pub overall: f64,
    pub hook: f64,
    pub originality: f64,
    pub style_fit: f64,
    pub safety: f64,
    pub authenticity: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            overall: 0.35,
            hook: 0.20,
            originality: 0.15,
            style_fit: 0.15,
            safety: 0.15,
            authenticity: 0.0,
        }
    }
}

/// Auto-scorer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub confidence_floor: f64,
    pub approval_min_overall: f64,
    pub approval_min_safety: f64,

    /// Human ratings needed for full confidence in a human reward
    pub human_ratings_for_full_confidence: f64,

    /// Deadline of one judge call
    #[serde(with = "serde_millis")]
    pub judge_timeout: Duration,

    /// Retries after the first failed judge call
    pub judge_max_retries: u32,

    /// Backoff base, doubled per retry
    #[serde(with = "serde_millis")]
    pub judge_backoff_base: Duration,

    pub reward_weights: RewardWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            confidence_floor: CONFIDENCE_FLOOR,
            approval_min_overall: 0.8,
            approval_min_safety: 0.8,
            human_ratings_for_full_confidence: 3.0,
            judge_timeout: Duration::from_secs(30),
            judge_max_retries: 3,
            judge_backoff_base: Duration::from_millis(500),
            reward_weights: RewardWeights::default(),
        }
    }
}

/// HTTP judge endpoint (OpenAI-compatible chat completions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.3,
            max_tokens: 512,
        }
    }
}

/// Which embedding backend feeds the index, the ranker and the copy guard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderProvider {
    /// Deterministic hashing, no model or network
    #[default]
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint
    Remote,
    /// fastembed model, needs the `local-embeddings` feature
    Local,
}

impl EmbedderProvider {
    pub fn name(&self) -> &'static str {
        match self {
            EmbedderProvider::Hashing => "hashing",
            EmbedderProvider::Remote => "remote",
            EmbedderProvider::Local => "local",
        }
    }
}

impl FromStr for EmbedderProvider {
    type Err = CalliopeError;

    fn from_str(s: &str) -> Result<Self> {
        [
            EmbedderProvider::Hashing,
            EmbedderProvider::Remote,
            EmbedderProvider::Local,
        ]
        .into_iter()
        .find(|p| p.name() == s)
        .ok_or_else(|| CalliopeError::InvalidInput(format!("unknown embedder '{}'", s)))
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub provider: EmbedderProvider,
    /// Model name; each provider has its own default
    pub model: Option<String>,
    /// Remote endpoint base URL
    pub base_url: Option<String>,
    /// Override of the provider's vector dimension
    pub dimensions: Option<usize>,
    /// Model cache of the local provider
    pub cache_dir: Option<PathBuf>,
}

/// Policy learner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub learning_rate: f64,
    pub epsilon_initial: f64,
    pub epsilon_decay: f64,
    pub epsilon_min: f64,

    /// Updates spent exploring before epsilon starts to decay
    pub exploring_updates: u64,

    /// Number of recent weight deltas considered for stability
    pub stability_window: usize,

    /// Variance of recent deltas below which a bucket is stable
    pub stability_variance: f64,

    /// Mean of recent deltas below which a bucket is stable
    pub stability_delta: f64,

    /// Step toward a random arm on an exploration update
    pub perturbation_step: f64,

    /// Scale of the UCB confidence bonus
    pub ucb_exploration: f64,

    /// Compare-and-swap attempts before surfacing a conflict
    pub max_update_retries: u32,

    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            learning_rate: LEARNING_RATE,
            epsilon_initial: EPSILON_INITIAL,
            epsilon_decay: EPSILON_DECAY,
            epsilon_min: EPSILON_MIN,
            exploring_updates: 20,
            stability_window: 10,
            stability_variance: 1e-5,
            stability_delta: 5e-3,
            perturbation_step: 0.05,
            ucb_exploration: 2.0_f64.sqrt(),
            max_update_retries: 8,
            seed: None,
        }
    }
}

// Durations are stored as integer milliseconds in TOML
mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let toml_str =
            toml::to_string_pretty(self).map_err(|e| CalliopeError::Config(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let n = &self.normalization;
        if n.rating_scale_max <= 0.0 {
            return invalid("normalization.rating_scale_max must be positive");
        }
        if !(0.0..=n.rating_scale_max).contains(&n.global_mean_rating) {
            return invalid("normalization.global_mean_rating must lie within the rating scale");
        }
        if n.shrinkage_prior_strength < 0.0 {
            return invalid("normalization.shrinkage_prior_strength must not be negative");
        }
        if n.freshness_decay_days <= 0.0 {
            return invalid("normalization.freshness_decay_days must be positive");
        }

        let r = &self.ranking;
        if r.pack_size == 0 {
            return invalid("ranking.pack_size must be at least 1");
        }
        check_unit("ranking.near_duplicate_threshold", r.near_duplicate_threshold)?;
        if r.bm25_k1 < 0.0 || !(0.0..=1.0).contains(&r.bm25_b) {
            return invalid("ranking.bm25_k1 must be >= 0 and ranking.bm25_b within [0, 1]");
        }

        let c = &self.copy_guard;
        check_unit("copy_guard.threshold", c.threshold)?;
        check_unit("copy_guard.critical_threshold", c.critical_threshold)?;
        if c.critical_threshold < c.threshold {
            return invalid("copy_guard.critical_threshold must be >= copy_guard.threshold");
        }

        let s = &self.scoring;
        check_unit("scoring.confidence_floor", s.confidence_floor)?;
        check_unit("scoring.approval_min_overall", s.approval_min_overall)?;
        check_unit("scoring.approval_min_safety", s.approval_min_safety)?;
        let w = &s.reward_weights;
        let weights = [
            w.overall,
            w.hook,
            w.originality,
            w.style_fit,
            w.safety,
            w.authenticity,
        ];
        if weights.iter().any(|v| *v < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return invalid("scoring.reward_weights must be non-negative with a positive sum");
        }
        if s.human_ratings_for_full_confidence <= 0.0 {
            return invalid("scoring.human_ratings_for_full_confidence must be positive");
        }
        if s.judge_timeout.is_zero() {
            return invalid("scoring.judge_timeout must be positive");
        }
        if s.judge_max_retries > MAX_JUDGE_RETRIES {
            return invalid(&format!(
                "scoring.judge_max_retries must be at most {}",
                MAX_JUDGE_RETRIES
            ));
        }

        if self.embedder.dimensions == Some(0) {
            return invalid("embedder.dimensions must be at least 1");
        }

        let l = &self.learner;
        if !(l.learning_rate > 0.0 && l.learning_rate <= 1.0) {
            return invalid("learner.learning_rate must be in (0, 1]");
        }
        check_unit("learner.epsilon_initial", l.epsilon_initial)?;
        check_unit("learner.epsilon_min", l.epsilon_min)?;
        if l.epsilon_min > l.epsilon_initial {
            return invalid("learner.epsilon_min must not exceed learner.epsilon_initial");
        }
        if !(l.epsilon_decay > 0.0 && l.epsilon_decay <= 1.0) {
            return invalid("learner.epsilon_decay must be in (0, 1]");
        }
        if l.stability_window < 2 {
            return invalid("learner.stability_window must be at least 2");
        }
        check_unit("learner.perturbation_step", l.perturbation_step)?;
        if l.ucb_exploration < 0.0 {
            return invalid("learner.ucb_exploration must not be negative");
        }
        if l.max_update_retries == 0 {
            return invalid("learner.max_update_retries must be at least 1");
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        invalid(&format!("{} must be within [0, 1]", name))
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(CalliopeError::Config(message.to_string()))
}
