//! Core data types for the Calliope exemplar engine
//!
//! This module defines the reference material the ranker works over
//! (items, fragments, quality signals), the request context and its bucket
//! key, the four-component weight vector, and generated candidates.

use crate::config::{RATING_SCALE_MAX, RATING_SCALE_MIN};
use crate::error::{CalliopeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Unique identifier for reference items
///
/// Ordered so that ties in ranking resolve deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    /// Create a new random item ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an item ID from a string
    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(pub Uuid);

impl FragmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FragmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role a fragment plays inside its reference item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentRole {
    Hook,
    Beat,
    Voiceover,
    Caption,
    /// Call to action
    Cta,
    /// Whole-item text used for ranking
    Full,
}

impl std::fmt::Display for FragmentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FragmentRole::Hook => "hook",
            FragmentRole::Beat => "beat",
            FragmentRole::Voiceover => "voiceover",
            FragmentRole::Caption => "caption",
            FragmentRole::Cta => "cta",
            FragmentRole::Full => "full",
        };
        f.write_str(name)
    }
}

/// A unit of reference text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(default)]
    pub id: FragmentId,
    #[serde(default)]
    pub item_id: ItemId,
    pub role: FragmentRole,
    pub text: String,
}

impl Fragment {
    pub fn new(item_id: ItemId, role: FragmentRole, text: impl Into<String>) -> Self {
        Self {
            id: FragmentId::new(),
            item_id,
            role,
            text: text.into(),
        }
    }

    /// SHA256 of the text, used to detect stale embeddings
    pub fn text_hash(&self) -> String {
        text_hash(&self.text)
    }
}

/// Hash text the same way embeddings are tagged
pub fn text_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Rating history of an item
///
/// Only the count and sum are stored; the shrunk value is derived on demand
/// by the quality normalizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySignal {
    pub rating_count: u32,
    pub rating_sum: f64,
}

impl QualitySignal {
    /// Build a signal from `count` identical ratings
    pub fn uniform(count: u32, rating: f64) -> Self {
        Self {
            rating_count: count,
            rating_sum: rating * count as f64,
        }
    }

    /// Fold a new human rating into the signal
    pub fn record(&mut self, rating: f64) -> Result<()> {
        if !rating.is_finite() || !(RATING_SCALE_MIN..=RATING_SCALE_MAX).contains(&rating) {
            return Err(CalliopeError::InvalidInput(format!(
                "rating {} outside {}-{} scale",
                rating, RATING_SCALE_MIN, RATING_SCALE_MAX
            )));
        }
        self.rating_count += 1;
        self.rating_sum += rating;
        Ok(())
    }

    /// Observed mean rating, if any ratings exist
    pub fn local_mean(&self) -> Option<f64> {
        if self.rating_count == 0 {
            None
        } else {
            Some(self.rating_sum / self.rating_count as f64)
        }
    }
}

/// A reference item eligible for exemplar packs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceItem {
    #[serde(default)]
    pub id: ItemId,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub fragments: Vec<Fragment>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub quality: QualitySignal,
}

impl ReferenceItem {
    /// Create an item holding a single `Full` fragment
    pub fn with_text(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let id = ItemId::new();
        Self {
            id,
            title: String::new(),
            fragments: vec![Fragment::new(id, FragmentRole::Full, text)],
            created_at,
            quality: QualitySignal::default(),
        }
    }

    /// Fragment whose embedding represents the item in ranking
    pub fn ranking_fragment(&self) -> Option<&Fragment> {
        self.fragments
            .iter()
            .find(|f| f.role == FragmentRole::Full)
            .or_else(|| self.fragments.first())
    }

    /// Point every fragment at this item
    pub fn adopt_fragments(&mut self) {
        let id = self.id;
        self.fragments.iter_mut().for_each(|f| f.item_id = id);
    }

    /// Text used for lexical scoring
    ///
    /// The `Full` fragment when present, else all fragments joined.
    pub fn ranking_text(&self) -> String {
        if let Some(full) = self.fragments.iter().find(|f| f.role == FragmentRole::Full) {
            return full.text.clone();
        }
        let parts: Vec<&str> = std::iter::once(self.title.as_str())
            .chain(self.fragments.iter().map(|f| f.text.as_str()))
            .filter(|s| !s.trim().is_empty())
            .collect();
        parts.join(" ")
    }
}

/// Key of an independently learned policy
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub persona: String,
    pub content_type: String,
}

impl BucketKey {
    pub fn new(persona: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            content_type: content_type.into(),
        }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.persona, self.content_type)
    }
}

/// Context of one generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub persona: String,
    pub content_type: String,

    #[serde(default)]
    pub seed_text: Option<String>,
}

impl RetrievalContext {
    pub fn new(persona: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            content_type: content_type.into(),
            seed_text: None,
        }
    }

    pub fn with_seed_text(mut self, seed: impl Into<String>) -> Self {
        self.seed_text = Some(seed.into());
        self
    }

    pub fn bucket(&self) -> BucketKey {
        BucketKey::new(self.persona.clone(), self.content_type.clone())
    }

    /// Query used for semantic and lexical matching
    ///
    /// Falls back to `"{persona} {content_type}"` without seed text.
    pub fn query_text(&self) -> String {
        match self.seed_text.as_deref().map(str::trim) {
            Some(seed) if !seed.is_empty() => seed.to_string(),
            _ => format!("{} {}", self.persona, self.content_type),
        }
    }
}

/// Ranking weights of the four normalized components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub semantic: f64,
    pub lexical: f64,
    pub quality: f64,
    pub freshness: f64,
}

impl WeightVector {
    /// Documented global defaults for unseen buckets
    pub const GLOBAL_DEFAULT: WeightVector = WeightVector {
        semantic: 0.45,
        lexical: 0.25,
        quality: 0.20,
        freshness: 0.10,
    };

    pub fn new(semantic: f64, lexical: f64, quality: f64, freshness: f64) -> Self {
        Self {
            semantic,
            lexical,
            quality,
            freshness,
        }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.semantic, self.lexical, self.quality, self.freshness]
    }

    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }

    /// Rescale to sum to 1
    ///
    /// Negative or non-finite components are clamped to zero first; a vector
    /// with nothing left falls back to the global defaults.
    ///
    /// A vector already summing to 1 within rounding is returned unchanged.
    pub fn normalized(&self) -> Self {
        let clean = |v: f64| if v.is_finite() { v.max(0.0) } else { 0.0 };
        let v = Self::new(
            clean(self.semantic),
            clean(self.lexical),
            clean(self.quality),
            clean(self.freshness),
        );
        let sum = v.sum();
        if sum <= f64::EPSILON {
            return Self::GLOBAL_DEFAULT;
        }
        // Already on the simplex up to rounding
        if (sum - 1.0).abs() <= 1e-12 {
            return v;
        }
        Self::new(
            v.semantic / sum,
            v.lexical / sum,
            v.quality / sum,
            v.freshness / sum,
        )
    }

    /// Move `step` of the way toward `target`, renormalized
    pub fn blend_toward(&self, target: &WeightVector, step: f64) -> Self {
        let step = step.clamp(0.0, 1.0);
        let mix = |a: f64, b: f64| (1.0 - step) * a + step * b;
        Self::new(
            mix(self.semantic, target.semantic),
            mix(self.lexical, target.lexical),
            mix(self.quality, target.quality),
            mix(self.freshness, target.freshness),
        )
        .normalized()
    }

    pub fn l1_distance(&self, other: &WeightVector) -> f64 {
        self.as_array()
            .iter()
            .zip(other.as_array().iter())
            .map(|(a, b)| (a - b).abs())
            .sum()
    }

    pub fn l2_distance(&self, other: &WeightVector) -> f64 {
        self.as_array()
            .iter()
            .zip(other.as_array().iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}

impl Default for WeightVector {
    fn default() -> Self {
        Self::GLOBAL_DEFAULT
    }
}

/// Sampling temperatures used across one generation batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureBand {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl TemperatureBand {
    pub const GLOBAL_DEFAULT: TemperatureBand = TemperatureBand {
        low: 0.4,
        mid: 0.7,
        high: 0.95,
    };

    pub const fn new(low: f64, mid: f64, high: f64) -> Self {
        Self { low, mid, high }
    }

    pub fn blend_toward(&self, target: &TemperatureBand, step: f64) -> Self {
        let step = step.clamp(0.0, 1.0);
        let mix = |a: f64, b: f64| (1.0 - step) * a + step * b;
        Self::new(
            mix(self.low, target.low),
            mix(self.mid, target.mid),
            mix(self.high, target.high),
        )
    }
}

impl Default for TemperatureBand {
    fn default() -> Self {
        Self::GLOBAL_DEFAULT
    }
}

/// Unique identifier for generated candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub Uuid);

impl CandidateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CandidateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structured part of a generated candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFragment {
    pub role: FragmentRole,
    pub text: String,
}

/// Text produced by the generation collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCandidate {
    #[serde(default)]
    pub id: CandidateId,
    pub text: String,
    /// Hook, caption and other parts when the generator reports them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fragments: Vec<CandidateFragment>,
}

impl GeneratedCandidate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: CandidateId::new(),
            text: text.into(),
            fragments: Vec::new(),
        }
    }

    pub fn with_fragment(mut self, role: FragmentRole, text: impl Into<String>) -> Self {
        self.fragments.push(CandidateFragment {
            role,
            text: text.into(),
        });
        self
    }

    /// Whole text as `Full`, then each reported fragment
    pub fn parts(&self) -> Vec<(FragmentRole, &str)> {
        std::iter::once((FragmentRole::Full, self.text.as_str()))
            .chain(self.fragments.iter().map(|f| (f.role, f.text.as_str())))
            .collect()
    }
}
