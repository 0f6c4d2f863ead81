//! MetaQA data layer for knowledge-graph-embedding question answering.
//!
//! Reads question files, builds the token vocabulary, and binds the names in
//! the entity/relation dictionaries to rows of pretrained embedding matrices.
//! Nothing here depends on a tensor framework; the `kgqa` crate turns these
//! types into burn tensors.

pub mod embeddings;
pub mod index;
pub mod questions;
pub mod types;
pub mod vocab;

pub use embeddings::{load_core_tensor, load_embeddings, CoreTensor, EmbeddingMatrix};
pub use index::{DictLayout, EntityIndex, IndexStats, PreparedEntities};
pub use questions::{parse_qa_line, read_qa_file, split_by_answer};
pub use types::{MetaQaError, QaRecord};
pub use vocab::Vocabulary;
