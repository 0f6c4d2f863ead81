//! Question relation extractor: a bag-of-words question encoder trained
//! against a frozen or fine-tuned pretrained entity table.

use burn::module::{Ignored, Param};
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{log_sigmoid, relu};
use burn::tensor::TensorData;

use metaqa::{CoreTensor, EmbeddingMatrix};

use crate::model::scoring::KgScoring;
use crate::model::{EntityScorer, QaObjective};
use crate::training::data::QaBatch;

/// Invalid model dimensions or inputs.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(
        "{scoring} with relation_dim={relation_dim} yields relation width {relation_width}, \
         but entity embeddings have width {entity_dim}"
    )]
    WidthMismatch {
        scoring: KgScoring,
        relation_dim: usize,
        relation_width: usize,
        entity_dim: usize,
    },
    #[error("vocabulary is empty")]
    EmptyVocabulary,
    #[error("entity embedding table is empty")]
    EmptyEntityTable,
    #[error("{0} scoring needs a core tensor (W.npy)")]
    MissingCore(KgScoring),
    #[error("core tensor has shape {found:?}, expected {expected:?}")]
    CoreShape {
        expected: [usize; 3],
        found: [usize; 3],
    },
}

/// Configuration for the question relation extractor.
///
/// ```text
/// tokens (batch, seq_len)
///   → Embedding(vocab_size→embedding_dim) → masked mean over tokens
///   → Linear(embedding_dim→hidden_dim) → ReLU → Dropout
///   → Linear(hidden_dim→relation width)        = r
/// score(h, r, e) = <scoredrop(combine(entdrop(h), reldrop(r))), e>  for every entity e
/// ```
///
/// `combine` is the scoring function of the pretrained embedding; TuckER's
/// core tensor is a trainable parameter initialised from `W.npy`.
#[derive(Config, Debug)]
pub struct RelationExtractorConfig {
    /// Number of distinct question tokens.
    pub vocab_size: usize,
    /// Word embedding width.
    #[config(default = 256)]
    pub embedding_dim: usize,
    /// Hidden layer width of the question encoder.
    #[config(default = 200)]
    pub hidden_dim: usize,
    /// Relation dimension of the pretrained KG embedding.
    #[config(default = 30)]
    pub relation_dim: usize,
    /// KG scoring function the pretrained embeddings were trained with.
    #[config(default = "KgScoring::ComplEx")]
    pub scoring: KgScoring,
    /// Dropout inside the question encoder.
    #[config(default = 0.1)]
    pub dropout: f64,
    /// Dropout on the head entity embedding.
    #[config(default = 0.0)]
    pub entdrop: f64,
    /// Dropout on the question relation embedding.
    #[config(default = 0.0)]
    pub reldrop: f64,
    /// Dropout on the combined head/relation query.
    #[config(default = 0.0)]
    pub scoredrop: f64,
    /// Label smoothing applied to the multi-hot targets.
    #[config(default = 0.0)]
    pub ls: f64,
    /// Weight of the L3 penalty on entity embeddings.
    #[config(default = 0.0)]
    pub l3_reg: f64,
    /// Keep the pretrained entity embeddings fixed.
    #[config(default = true)]
    pub freeze: bool,
}

/// Non-learnable settings carried by the module.
#[derive(Debug, Clone, Copy)]
struct ObjectiveSettings {
    scoring: KgScoring,
    freeze: bool,
    ls: f64,
    l3_reg: f64,
}

/// Question encoder plus pretrained entity table.
#[derive(Module, Debug)]
pub struct RelationExtractor<B: Backend> {
    word_embedding: Embedding<B>,
    hidden: Linear<B>,
    output: Linear<B>,
    dropout: Dropout,
    entdrop: Dropout,
    reldrop: Dropout,
    scoredrop: Dropout,
    /// `(num_entities, entity_dim)`, initialised from the pretrained matrix.
    entity_embeddings: Param<Tensor<B, 2>>,
    /// `(relation_dim, entity_dim, entity_dim)`, TuckER only.
    core: Option<Param<Tensor<B, 3>>>,
    settings: Ignored<ObjectiveSettings>,
}

impl RelationExtractorConfig {
    /// Check dimensions against a pretrained entity matrix and core tensor.
    pub fn validate(
        &self,
        entities: &EmbeddingMatrix,
        core: Option<&CoreTensor>,
    ) -> Result<(), ModelError> {
        if self.vocab_size == 0 {
            return Err(ModelError::EmptyVocabulary);
        }
        if entities.rows() == 0 {
            return Err(ModelError::EmptyEntityTable);
        }
        if self.scoring.needs_core() {
            let core = core.ok_or(ModelError::MissingCore(self.scoring))?;
            let expected = [self.relation_dim, entities.dim(), entities.dim()];
            if core.shape() != expected {
                return Err(ModelError::CoreShape {
                    expected,
                    found: core.shape(),
                });
            }
            return Ok(());
        }
        let relation_width = self.scoring.relation_width(self.relation_dim);
        if relation_width != entities.dim() {
            return Err(ModelError::WidthMismatch {
                scoring: self.scoring,
                relation_dim: self.relation_dim,
                relation_width,
                entity_dim: entities.dim(),
            });
        }
        Ok(())
    }

    /// Initialize the model with pretrained entity embeddings.
    pub fn init<B: Backend>(
        &self,
        entities: &EmbeddingMatrix,
        device: &B::Device,
    ) -> Result<RelationExtractor<B>, ModelError> {
        self.init_with_core(entities, None, device)
    }

    /// Initialize the model, with a core tensor for scoring functions that use one.
    ///
    /// `core` is ignored by ComplEx and DistMult.
    pub fn init_with_core<B: Backend>(
        &self,
        entities: &EmbeddingMatrix,
        core: Option<&CoreTensor>,
        device: &B::Device,
    ) -> Result<RelationExtractor<B>, ModelError> {
        self.validate(entities, core)?;
        let core = core.filter(|_| self.scoring.needs_core()).map(|w| {
            Param::from_tensor(Tensor::<B, 3>::from_data(
                TensorData::new(w.as_slice().to_vec(), w.shape()),
                device,
            ))
        });
        let relation_width = self.scoring.relation_width(self.relation_dim);
        let table = Tensor::<B, 2>::from_data(
            TensorData::new(entities.as_slice().to_vec(), [entities.rows(), entities.dim()]),
            device,
        );

        Ok(RelationExtractor {
            word_embedding: EmbeddingConfig::new(self.vocab_size, self.embedding_dim).init(device),
            hidden: LinearConfig::new(self.embedding_dim, self.hidden_dim).init(device),
            output: LinearConfig::new(self.hidden_dim, relation_width).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            entdrop: DropoutConfig::new(self.entdrop).init(),
            reldrop: DropoutConfig::new(self.reldrop).init(),
            scoredrop: DropoutConfig::new(self.scoredrop).init(),
            entity_embeddings: Param::from_tensor(table),
            core,
            settings: Ignored(ObjectiveSettings {
                scoring: self.scoring,
                freeze: self.freeze,
                ls: self.ls,
                l3_reg: self.l3_reg,
            }),
        })
    }
}

impl<B: Backend> RelationExtractor<B> {
    /// Entity table as used in the forward pass. Detached when frozen.
    fn entity_table(&self) -> Tensor<B, 2> {
        let table = self.entity_embeddings.val();
        if self.settings.freeze {
            table.detach()
        } else {
            table
        }
    }

    /// Encode questions into relation embeddings.
    ///
    /// Input: `tokens` `(batch, seq_len)`, `mask` `(batch, seq_len)`.
    /// Output: `(batch, relation_width)`.
    pub fn encode_question(&self, tokens: Tensor<B, 2, Int>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
        let words = self.word_embedding.forward(tokens); // (batch, seq_len, emb)
        let weights = mask.clone().unsqueeze_dim::<3>(2); // (batch, seq_len, 1)
        let summed: Tensor<B, 2> = (words * weights).sum_dim(1).squeeze::<2>(1);
        let counts = mask.sum_dim(1).clamp_min(1.0); // (batch, 1)
        let pooled = summed / counts;

        let x = self.hidden.forward(pooled);
        let x = relu(x);
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }

    fn scores_with_table(
        &self,
        entities: Tensor<B, 2>,
        tokens: Tensor<B, 2, Int>,
        mask: Tensor<B, 2>,
        heads: Tensor<B, 1, Int>,
    ) -> Tensor<B, 2> {
        let scoring = self.settings.scoring;
        let head = self.entdrop.forward(entities.clone().select(0, heads));
        let relation = self.reldrop.forward(self.encode_question(tokens, mask));
        let core = self.core.as_ref().map(|w| w.val());
        let query = self.scoredrop.forward(scoring.combine(head, relation, core));
        scoring.score_all(query, entities)
    }
}

impl<B: Backend> EntityScorer<B> for RelationExtractor<B> {
    fn score_entities(
        &self,
        tokens: Tensor<B, 2, Int>,
        mask: Tensor<B, 2>,
        heads: Tensor<B, 1, Int>,
    ) -> Tensor<B, 2> {
        self.scores_with_table(self.entity_table(), tokens, mask, heads)
    }

    fn num_entities(&self) -> usize {
        self.entity_embeddings.val().dims()[0]
    }
}

impl<B: Backend> QaObjective<B> for RelationExtractor<B> {
    /// Summed binary cross-entropy over every (question, entity) pair, plus
    /// the optional L3 penalty on entity embeddings.
    fn loss(&self, batch: &QaBatch<B>) -> Tensor<B, 1> {
        let entities = self.entity_table();
        let logits = self.scores_with_table(
            entities.clone(),
            batch.tokens.clone(),
            batch.mask.clone(),
            batch.heads.clone(),
        );
        let [_, num_entities] = logits.dims();

        let ls = self.settings.ls;
        let targets = if ls > 0.0 {
            batch.targets.clone() * (1.0 - ls) + 1.0 / num_entities as f64
        } else {
            batch.targets.clone()
        };

        // BCE with logits: -(t·log σ(x) + (1 - t)·log σ(-x))
        let positive = targets.clone() * log_sigmoid(logits.clone());
        let negative = (targets.neg() + 1.0) * log_sigmoid(logits.neg());
        let bce = (positive + negative).sum().neg();

        let l3_reg = self.settings.l3_reg;
        if l3_reg > 0.0 {
            let norms = entities
                .abs()
                .powf_scalar(3.0)
                .sum_dim(1)
                .powf_scalar(1.0 / 3.0);
            bce + norms.sum() * l3_reg
        } else {
            bce
        }
    }
}
