//! Anti-copy guard
//!
//! Compares a generated candidate against the exemplars used to produce it.
//! A flagged candidate is surfaced with its evidence; the caller decides
//! whether to retry or route it to review.

use crate::config::CopyGuardConfig;
use crate::embeddings::{cosine_similarity, EmbeddingService};
use crate::error::Result;
use crate::retrieval::ranker::ExemplarPack;
use crate::types::{FragmentId, FragmentRole, GeneratedCandidate, ItemId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopyVerdict {
    Safe,
    NeedsRewrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    High,
    Critical,
}

/// Closest exemplar of a flagged candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CopyEvidence {
    /// Part of the candidate that matched
    pub candidate_role: FragmentRole,
    pub item_id: ItemId,
    pub fragment_id: Option<FragmentId>,
    /// Part of the exemplar it matched
    pub exemplar_role: FragmentRole,
    pub similarity: f64,
    pub urgency: Urgency,
}

/// Result of one copy check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CopyCheck {
    pub verdict: CopyVerdict,
    /// Highest similarity seen, `None` when nothing was compared
    pub max_similarity: Option<f64>,
    pub evidence: Option<CopyEvidence>,
    /// Candidate parts at or above the rewrite threshold
    pub flagged_roles: Vec<FragmentRole>,
    pub exemplars_compared: usize,
    /// Candidate was too short to check
    pub skipped: bool,
}

impl CopyCheck {
    fn safe_unchecked() -> Self {
        Self {
            verdict: CopyVerdict::Safe,
            max_similarity: None,
            evidence: None,
            flagged_roles: Vec::new(),
            exemplars_compared: 0,
            skipped: true,
        }
    }

    pub fn needs_rewrite(&self) -> bool {
        self.verdict == CopyVerdict::NeedsRewrite
    }
}

/// Exemplar reference used in a comparison
#[derive(Debug, Clone)]
pub struct ExemplarVector {
    pub item_id: ItemId,
    pub fragment_id: Option<FragmentId>,
    pub role: FragmentRole,
    pub embedding: Arc<Vec<f32>>,
}

/// Anti-copy guard
#[derive(Debug, Clone)]
pub struct CopyGuard {
    config: CopyGuardConfig,
}

impl CopyGuard {
    pub fn new(config: CopyGuardConfig) -> Self {
        Self { config }
    }

    /// Verdict for a maximum similarity
    pub fn classify(&self, similarity: f64) -> (CopyVerdict, Option<Urgency>) {
        if similarity >= self.config.critical_threshold {
            (CopyVerdict::NeedsRewrite, Some(Urgency::Critical))
        } else if similarity >= self.config.threshold {
            (CopyVerdict::NeedsRewrite, Some(Urgency::High))
        } else {
            (CopyVerdict::Safe, None)
        }
    }

    /// Check a pre-embedded candidate against exemplar vectors
    pub fn evaluate(&self, candidate: &[f32], exemplars: &[ExemplarVector]) -> CopyCheck {
        self.evaluate_parts(&[(FragmentRole::Full, candidate)], exemplars)
    }

    /// Check each pre-embedded candidate part against every exemplar vector
    ///
    /// The verdict follows the single closest pair.
    pub fn evaluate_parts(
        &self,
        parts: &[(FragmentRole, &[f32])],
        exemplars: &[ExemplarVector],
    ) -> CopyCheck {
        let mut closest: Option<(FragmentRole, &ExemplarVector, f64)> = None;
        let mut flagged_roles = Vec::new();

        for (role, embedding) in parts {
            let part_best = exemplars
                .iter()
                .map(|e| (e, cosine_similarity(embedding, &e.embedding) as f64))
                .max_by(|(_, a), (_, b)| a.total_cmp(b));
            let Some((exemplar, similarity)) = part_best else {
                continue;
            };

            if similarity >= self.config.threshold && !flagged_roles.contains(role) {
                flagged_roles.push(*role);
            }
            if closest.map_or(true, |(_, _, best)| similarity > best) {
                closest = Some((*role, exemplar, similarity));
            }
        }

        let Some((candidate_role, exemplar, similarity)) = closest else {
            return CopyCheck {
                verdict: CopyVerdict::Safe,
                max_similarity: None,
                evidence: None,
                flagged_roles,
                exemplars_compared: 0,
                skipped: false,
            };
        };

        let (verdict, urgency) = self.classify(similarity);
        let evidence = urgency.map(|urgency| CopyEvidence {
            candidate_role,
            item_id: exemplar.item_id,
            fragment_id: exemplar.fragment_id,
            exemplar_role: exemplar.role,
            similarity,
            urgency,
        });

        CopyCheck {
            verdict,
            max_similarity: Some(similarity),
            evidence,
            flagged_roles,
            exemplars_compared: exemplars.len(),
            skipped: false,
        }
    }

    /// Check candidate text against an exemplar pack
    pub async fn check(
        &self,
        candidate: &str,
        pack: &ExemplarPack,
        embedder: &dyn EmbeddingService,
    ) -> Result<CopyCheck> {
        self.check_parts(&[(FragmentRole::Full, candidate)], pack, embedder)
            .await
    }

    /// Check a generated candidate's whole text and each of its fragments
    pub async fn check_candidate(
        &self,
        candidate: &GeneratedCandidate,
        pack: &ExemplarPack,
        embedder: &dyn EmbeddingService,
    ) -> Result<CopyCheck> {
        self.check_parts(&candidate.parts(), pack, embedder).await
    }

    /// Check candidate parts against the pack's exemplars and their fragments
    ///
    /// Parts shorter than the configured minimum are skipped. Exemplars
    /// without an embedding are embedded on the fly.
    pub async fn check_parts(
        &self,
        parts: &[(FragmentRole, &str)],
        pack: &ExemplarPack,
        embedder: &dyn EmbeddingService,
    ) -> Result<CopyCheck> {
        let parts: Vec<(FragmentRole, &str)> = parts
            .iter()
            .filter(|(_, text)| text.trim().chars().count() >= self.config.min_candidate_chars)
            .copied()
            .collect();
        if parts.is_empty() {
            debug!("Candidate too short for copy check");
            return Ok(CopyCheck::safe_unchecked());
        }

        let texts: Vec<&str> = parts.iter().map(|(_, text)| *text).collect();
        let part_embeddings = embedder.embed_batch(&texts).await?;

        let exemplars = self.exemplar_vectors(pack, embedder).await?;

        let embedded: Vec<(FragmentRole, &[f32])> = parts
            .iter()
            .zip(part_embeddings.iter())
            .map(|((role, _), embedding)| (*role, embedding.as_slice()))
            .collect();
        let check = self.evaluate_parts(&embedded, &exemplars);

        match &check.evidence {
            Some(evidence) => info!(
                "Candidate needs rewrite: {} has similarity {:.3} to {} of exemplar {} ({:?})",
                evidence.candidate_role,
                evidence.similarity,
                evidence.exemplar_role,
                evidence.item_id,
                evidence.urgency
            ),
            None => debug!(
                "Candidate safe (max similarity {:.3} over {} exemplar vectors)",
                check.max_similarity.unwrap_or(0.0),
                check.exemplars_compared
            ),
        }
        Ok(check)
    }

    /// Whole-entry and fragment vectors of a pack, embedding missing ones
    async fn exemplar_vectors(
        &self,
        pack: &ExemplarPack,
        embedder: &dyn EmbeddingService,
    ) -> Result<Vec<ExemplarVector>> {
        let mut pending: Vec<(ExemplarVector, Option<&str>)> = Vec::new();
        let placeholder = Arc::new(Vec::new());

        for entry in &pack.entries {
            let (embedding, missing) = match &entry.embedding {
                Some(e) => (Arc::clone(e), None),
                None => (Arc::clone(&placeholder), Some(entry.text.as_str())),
            };
            pending.push((
                ExemplarVector {
                    item_id: entry.item_id,
                    fragment_id: entry.fragment_id,
                    role: FragmentRole::Full,
                    embedding,
                },
                missing,
            ));

            for reference in &entry.references {
                let (embedding, missing) = match &reference.embedding {
                    Some(e) => (Arc::clone(e), None),
                    None => (Arc::clone(&placeholder), Some(reference.text.as_str())),
                };
                pending.push((
                    ExemplarVector {
                        item_id: entry.item_id,
                        fragment_id: Some(reference.fragment_id),
                        role: reference.role,
                        embedding,
                    },
                    missing,
                ));
            }
        }

        let missing: Vec<&str> = pending.iter().filter_map(|(_, text)| *text).collect();
        let mut computed = if missing.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&missing).await?
        }
        .into_iter();

        let mut exemplars = Vec::with_capacity(pending.len());
        for (mut exemplar, missing) in pending {
            if missing.is_some() {
                match computed.next() {
                    Some(v) => exemplar.embedding = Arc::new(v),
                    None => continue,
                }
            }
            exemplars.push(exemplar);
        }
        Ok(exemplars)
    }
}
