//! Calliope - hybrid exemplar retrieval with online policy learning
//!
//! Selects and ranks the reference exemplars fed into a generation step and
//! learns, per (persona, content type) bucket, how to weight its own ranking
//! signals:
//! - Four normalized signals: semantic, lexical (BM25), Bayesian-shrunk
//!   quality and freshness
//! - A hybrid ranker producing deduplicated exemplar packs
//! - An anti-copy guard for generated output
//! - An LLM auto-scorer turning judge output into rewards
//! - A contextual bandit adapting weights and temperatures
//!
//! # Example
//!
//! ```ignore
//! use calliope_core::{EngineConfig, ExemplarEngine, LlmJudge, RetrievalContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> calliope_core::Result<()> {
//!     let config = EngineConfig::default();
//!     let judge = Arc::new(LlmJudge::from_env(config.judge.clone())?);
//!     let engine = ExemplarEngine::in_memory(config, judge);
//!
//!     let pool = load_reference_items()?;
//!     engine.index_pool(&pool).await?;
//!
//!     let context = RetrievalContext::new("mia", "comedy");
//!     let pack = engine.retrieve(&context, &pool, None).await;
//!     for entry in &pack.entries {
//!         println!("{:.3} {}", entry.score, entry.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod policy;
pub mod retrieval;
pub mod services;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use embeddings::{EmbeddingIndex, EmbeddingService, HashingEmbedder};
pub use engine::{CandidateReport, ExemplarEngine, RoundReport};
pub use error::{CalliopeError, Result};
pub use evaluation::{ApprovalDecision, AutoScore, AutoScorer, Judge, RewardSignal};
pub use policy::{ArmId, PolicyLearner, PolicyPhase, PolicyRecord, PolicyStore};
pub use retrieval::{CopyCheck, CopyGuard, CopyVerdict, ExemplarPack, HybridRanker};
pub use services::{Generator, LlmJudge};
pub use storage::{AutoScoreLog, InMemoryAutoScoreLog};
pub use types::{
    BucketKey, CandidateFragment, Fragment, FragmentRole, GeneratedCandidate, ItemId, QualitySignal,
    ReferenceItem, RetrievalContext, TemperatureBand, WeightVector,
};
