//! Token vocabulary built from question text.

use std::collections::HashMap;

use crate::types::QaRecord;

/// Append-only token vocabulary with dense ids assigned in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    word_to_id: HashMap<String, usize>,
    id_to_word: Vec<String>,
    max_len: usize,
}

impl Vocabulary {
    /// Build the vocabulary from the questions of `records`, in order.
    pub fn build(records: &[QaRecord]) -> Self {
        Self::from_questions(records.iter().map(|r| r.question.as_str()))
    }

    /// Build the vocabulary from raw question strings, in order.
    ///
    /// Also tracks the longest question in tokens. Empty input yields an
    /// empty vocabulary with `max_len() == 0`.
    pub fn from_questions<'a, I>(questions: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut vocab = Self::default();
        for question in questions {
            let mut length = 0;
            for word in question.split_whitespace() {
                vocab.insert(word);
                length += 1;
            }
            vocab.max_len = vocab.max_len.max(length);
        }
        tracing::debug!(size = vocab.len(), max_len = vocab.max_len, "Built vocabulary");
        vocab
    }

    fn insert(&mut self, word: &str) -> usize {
        if let Some(&id) = self.word_to_id.get(word) {
            return id;
        }
        let id = self.id_to_word.len();
        self.word_to_id.insert(word.to_string(), id);
        self.id_to_word.push(word.to_string());
        id
    }

    pub fn id(&self, word: &str) -> Option<usize> {
        self.word_to_id.get(word).copied()
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.id_to_word.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.id_to_word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_word.is_empty()
    }

    /// Length in tokens of the longest question seen while building.
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
