//! Generation capability
//!
//! Candidate text is produced outside this crate. The engine only needs the
//! pack, the context and a sampling temperature; failures come back as
//! `CalliopeError::Generation` and are retried by the caller.

use crate::error::Result;
use crate::retrieval::ExemplarPack;
use crate::types::{GeneratedCandidate, RetrievalContext};
use async_trait::async_trait;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce candidates conditioned on the exemplar pack
    async fn generate(
        &self,
        pack: &ExemplarPack,
        context: &RetrievalContext,
        temperature: f64,
    ) -> Result<Vec<GeneratedCandidate>>;
}
