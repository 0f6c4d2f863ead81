//! Encoded question samples and the burn data pipeline over them.
//!
//! Raw [`QaRecord`]s from the `metaqa` crate are encoded against the token
//! vocabulary and the prepared entity ids into [`QaItem`]s. A [`QaDataset`]
//! serves them to burn's data loader and [`QaBatcher`] pads them into
//! [`QaBatch`] tensors.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::transform::ShuffledDataset;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use burn::tensor::TensorData;

use metaqa::{PreparedEntities, QaRecord, Vocabulary};

/// Why a record could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("unknown token {0:?}")]
    UnknownToken(String),
    #[error("unknown head entity {0:?}")]
    UnknownHead(String),
    #[error("unknown answer entity {0:?}")]
    UnknownAnswer(String),
    #[error("question has no tokens")]
    EmptyQuestion,
}

/// One encoded question.
#[derive(Debug, Clone, PartialEq)]
pub struct QaItem {
    /// Head entity id.
    pub head: usize,
    /// Token ids of the question, in order.
    pub tokens: Vec<usize>,
    /// Gold answer entity ids.
    pub answers: Vec<usize>,
    /// Number of tokens.
    pub len: usize,
    /// Question text as read from the file.
    pub question: String,
}

/// Encode a raw record. Every token and entity must be known.
pub fn encode_record(
    record: &QaRecord,
    vocab: &Vocabulary,
    entities: &PreparedEntities,
) -> Result<QaItem, EncodeError> {
    let mut tokens = Vec::new();
    for token in record.tokens() {
        let id = vocab
            .id(token)
            .ok_or_else(|| EncodeError::UnknownToken(token.to_string()))?;
        tokens.push(id);
    }
    if tokens.is_empty() {
        return Err(EncodeError::EmptyQuestion);
    }
    let head = entities
        .id(&record.head)
        .ok_or_else(|| EncodeError::UnknownHead(record.head.clone()))?;
    let answers = record
        .answers
        .iter()
        .map(|a| {
            entities
                .id(a)
                .ok_or_else(|| EncodeError::UnknownAnswer(a.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QaItem {
        head,
        len: tokens.len(),
        tokens,
        answers,
        question: record.question.clone(),
    })
}

/// In-memory dataset of encoded questions.
#[derive(Debug, Clone, Default)]
pub struct QaDataset {
    items: Vec<QaItem>,
}

impl QaDataset {
    pub fn new(items: Vec<QaItem>) -> Self {
        Self { items }
    }

    /// Encode every record, failing on the first one that cannot be encoded.
    pub fn encode_all(
        records: &[QaRecord],
        vocab: &Vocabulary,
        entities: &PreparedEntities,
    ) -> Result<Self, EncodeError> {
        let items = records
            .iter()
            .map(|r| encode_record(r, vocab, entities))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { items })
    }

    pub fn items(&self) -> &[QaItem] {
        &self.items
    }
}

impl Dataset<QaItem> for QaDataset {
    fn get(&self, index: usize) -> Option<QaItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A padded batch of questions.
#[derive(Debug, Clone)]
pub struct QaBatch<B: Backend> {
    /// `(batch, max_len)` token ids, right-padded with 0.
    pub tokens: Tensor<B, 2, Int>,
    /// `(batch, max_len)`, 1.0 at real tokens and 0.0 at padding.
    pub mask: Tensor<B, 2>,
    /// `(batch,)` question lengths.
    pub lengths: Tensor<B, 1, Int>,
    /// `(batch,)` head entity ids.
    pub heads: Tensor<B, 1, Int>,
    /// `(batch, num_entities)` multi-hot gold answers.
    pub targets: Tensor<B, 2>,
}

/// Pads [`QaItem`]s into a [`QaBatch`] on a fixed device.
#[derive(Debug, Clone)]
pub struct QaBatcher<B: Backend> {
    device: B::Device,
    num_entities: usize,
}

impl<B: Backend> QaBatcher<B> {
    pub fn new(device: B::Device, num_entities: usize) -> Self {
        Self {
            device,
            num_entities,
        }
    }
}

impl<B: Backend> Batcher<QaItem, QaBatch<B>> for QaBatcher<B> {
    fn batch(&self, items: Vec<QaItem>) -> QaBatch<B> {
        let batch_size = items.len();
        let max_len = items.iter().map(|i| i.len).max().unwrap_or(0).max(1);

        let mut tokens = vec![0i64; batch_size * max_len];
        let mut mask = vec![0.0f32; batch_size * max_len];
        let mut targets = vec![0.0f32; batch_size * self.num_entities];
        let mut lengths = Vec::with_capacity(batch_size);
        let mut heads = Vec::with_capacity(batch_size);

        for (row, item) in items.iter().enumerate() {
            for (col, &token) in item.tokens.iter().enumerate() {
                tokens[row * max_len + col] = token as i64;
                mask[row * max_len + col] = 1.0;
            }
            for &answer in &item.answers {
                targets[row * self.num_entities + answer] = 1.0;
            }
            lengths.push(item.len as i64);
            heads.push(item.head as i64);
        }

        QaBatch {
            tokens: Tensor::from_data(TensorData::new(tokens, [batch_size, max_len]), &self.device),
            mask: Tensor::from_data(TensorData::new(mask, [batch_size, max_len]), &self.device),
            lengths: Tensor::from_data(TensorData::new(lengths, [batch_size]), &self.device),
            heads: Tensor::from_data(TensorData::new(heads, [batch_size]), &self.device),
            targets: Tensor::from_data(
                TensorData::new(targets, [batch_size, self.num_entities]),
                &self.device,
            ),
        }
    }
}

/// Loader settings for one pass over a dataset.
#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub batch_size: usize,
    /// Seed of the global shuffle; `None` keeps file order.
    pub shuffle_seed: Option<u64>,
    pub num_workers: usize,
}

/// Batches yielded by a loader built with `options` over `len` items.
///
/// With workers the loader splits the dataset into `num_workers` contiguous
/// partitions (the last one takes the remainder) and batches each separately.
pub fn loader_batches(len: usize, options: &LoaderOptions) -> usize {
    let batch_size = options.batch_size.max(1);
    if options.num_workers == 0 {
        return len.div_ceil(batch_size);
    }
    let workers = options.num_workers;
    let part = len / workers;
    let last = len - part * (workers - 1);
    part.div_ceil(batch_size) * (workers - 1) + last.div_ceil(batch_size)
}

/// Build a burn data loader for one pass over `dataset`.
///
/// Shuffling permutes the whole dataset before it reaches the loader, so
/// every worker partition is a random sample of the data. Pass a new seed
/// each pass to get a new order.
pub fn build_loader<B: Backend>(
    batcher: QaBatcher<B>,
    dataset: Arc<QaDataset>,
    options: LoaderOptions,
) -> Arc<dyn DataLoader<QaBatch<B>>> {
    let mut builder = DataLoaderBuilder::new(batcher).batch_size(options.batch_size.max(1));
    if options.num_workers > 0 {
        builder = builder.num_workers(options.num_workers);
    }
    match options.shuffle_seed {
        Some(seed) => builder.build(ShuffledDataset::<_, QaItem>::with_seed(dataset, seed)),
        None => builder.build(dataset),
    }
}
