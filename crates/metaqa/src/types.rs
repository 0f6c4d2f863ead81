//! Shared record and error types.

use std::path::PathBuf;

/// Errors raised while reading MetaQA inputs.
#[derive(Debug, thiserror::Error)]
pub enum MetaQaError {
    /// IO error while opening or reading an input file.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The embedding array could not be read or has the wrong shape.
    #[error("Failed to read embeddings from {path}: {reason}")]
    Embeddings { path: PathBuf, reason: String },

    /// A question file line did not match any accepted layout.
    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// One raw question sample: head entity, question text, gold answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QaRecord {
    /// Topic entity the question is anchored on.
    pub head: String,
    /// Question text with the head entity replaced by a placeholder token.
    pub question: String,
    /// Gold answer entity names. Never empty for records read from disk.
    pub answers: Vec<String>,
}

impl QaRecord {
    pub fn new(head: impl Into<String>, question: impl Into<String>, answers: Vec<String>) -> Self {
        Self {
            head: head.into(),
            question: question.into(),
            answers,
        }
    }

    /// Whitespace-delimited question tokens.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.question.split_whitespace()
    }
}
