//! Knowledge-graph-embedding question answering on burn.
//!
//! Encodes natural-language questions into a relation embedding, scores every
//! entity of a pretrained knowledge-graph embedding against (head, relation),
//! and trains that encoder with patience-based early stopping. Evaluation
//! reports accuracy and Hits@1/5/10 against gold answer sets.

pub mod eval;
pub mod model;
pub mod training;

pub use eval::{evaluate, EvalOptions, EvalReport, Evaluation, SampleEval, SampleOutcome};
pub use model::{
    EntityScorer, KgScoring, ModelError, QaObjective, RelationExtractor, RelationExtractorConfig,
};
pub use training::checkpoint::{load_model, save_model, CheckpointMeta, CheckpointPaths};
pub use training::data::{encode_record, EncodeError, QaBatch, QaBatcher, QaDataset, QaItem};
pub use training::session::{StopReason, TrainingSession, ValidationDecision};
pub use training::trainer::{
    run_schedule, train, PhaseRunner, TrainOutcome, TrainingConfig, TrainingRun,
};
