//! Model capability traits and the bundled relation-extraction model.
//!
//! The training loop and evaluator only see [`EntityScorer`] and
//! [`QaObjective`]; [`RelationExtractor`] is one implementation of them.

pub mod relation_extractor;
pub mod scoring;

use burn::prelude::*;

use crate::training::data::QaBatch;

pub use relation_extractor::{ModelError, RelationExtractor, RelationExtractorConfig};
pub use scoring::KgScoring;

/// Scores every knowledge-graph entity as an answer to each question.
pub trait EntityScorer<B: Backend> {
    /// Per-entity plausibility scores.
    ///
    /// - `tokens`: `(batch, seq_len)` token ids, right-padded
    /// - `mask`: `(batch, seq_len)`, 1.0 for real tokens and 0.0 for padding
    /// - `heads`: `(batch,)` head entity ids
    ///
    /// Returns `(batch, num_entities)`; higher means more plausible.
    fn score_entities(
        &self,
        tokens: Tensor<B, 2, Int>,
        mask: Tensor<B, 2>,
        heads: Tensor<B, 1, Int>,
    ) -> Tensor<B, 2>;

    /// Number of entities scored per question.
    fn num_entities(&self) -> usize;
}

/// A scorer that can also produce a scalar training loss for a batch.
pub trait QaObjective<B: Backend>: EntityScorer<B> {
    /// Scalar loss of shape `(1,)`.
    fn loss(&self, batch: &QaBatch<B>) -> Tensor<B, 1>;
}
