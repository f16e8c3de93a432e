//! Exemplar retrieval
//!
//! Normalizers, BM25 lexical scoring, the hybrid ranker and the anti-copy
//! guard that checks generated output against the pack it was built from.

pub mod copy_guard;
pub mod lexical;
pub mod normalize;
pub mod ranker;

pub use copy_guard::{CopyCheck, CopyEvidence, CopyGuard, CopyVerdict, ExemplarVector, Urgency};
pub use lexical::{tokenize, Bm25Scorer};
pub use ranker::{ComponentScores, ExemplarPack, HybridRanker, PackEntry, ReferenceFragment};
