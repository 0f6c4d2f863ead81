//! Checkpoint naming and (de)serialization.
//!
//! Weights are stored as burn named MessagePack written to the exact
//! `.chkpt` path, with a JSON sidecar at `<path>.meta.json`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder};

/// Suffix marking checkpoints trained with frozen entity embeddings.
pub const FROZEN_SUFFIX: &str = "_frozen";

/// `{model}_{hops}_{suffix}_{kg_type}`.
pub fn checkpoint_stem(model: &str, hops: usize, suffix: &str, kg_type: &str) -> String {
    format!("{model}_{hops}_{suffix}_{kg_type}")
}

/// Where a run writes its checkpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    /// Rewritten every time validation improves.
    pub improved: PathBuf,
    /// Written once when training stops; read back by test mode.
    pub best: PathBuf,
}

impl CheckpointPaths {
    pub fn new(dir: &Path, model: &str, hops: usize, freeze: bool, kg_type: &str) -> Self {
        let suffix = if freeze { FROZEN_SUFFIX } else { "" };
        Self {
            improved: dir.join(format!("{}.chkpt", checkpoint_stem(model, hops, suffix, kg_type))),
            best: dir.join(format!(
                "{}_best_score_model.chkpt",
                checkpoint_stem(model, hops, "", kg_type)
            )),
        }
    }
}

/// Sidecar metadata saved next to each checkpoint.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointMeta {
    pub model: String,
    pub kg_type: String,
    pub hops: usize,
    /// Epoch whose validation produced the saved weights.
    pub epoch: usize,
    /// Validation accuracy of the saved weights.
    pub score: f64,
    pub vocab_size: usize,
    pub num_entities: usize,
}

/// `<path>.meta.json`
pub fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Save model weights to `path` and metadata to [`meta_path`].
pub fn save_model<B: Backend, M: Module<B>>(
    model: &M,
    path: &Path,
    meta: &CheckpointMeta,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::new();
    let bytes = Recorder::<B>::record(&recorder, model.clone().into_record(), ())
        .map_err(|e| anyhow::anyhow!("Failed to serialize model for {}: {e}", path.display()))?;
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write checkpoint {}", path.display()))?;

    let meta_file = meta_path(path);
    serde_json::to_writer_pretty(
        std::fs::File::create(&meta_file)
            .with_context(|| format!("Failed to create {}", meta_file.display()))?,
        meta,
    )?;

    tracing::info!(
        path = %path.display(),
        epoch = meta.epoch,
        score = meta.score,
        "Checkpoint saved"
    );
    Ok(())
}

/// Load weights from `path` into `model`.
///
/// `model` must have the same architecture as the saved one.
pub fn load_model<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> anyhow::Result<M> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::new();
    let record = Recorder::<B>::load(&recorder, bytes, device)
        .map_err(|e| anyhow::anyhow!("Failed to load checkpoint from {}: {e}", path.display()))?;
    tracing::info!(path = %path.display(), "Checkpoint loaded");
    Ok(model.load_record(record))
}

/// Read the metadata sidecar of a checkpoint.
pub fn read_meta(path: &Path) -> anyhow::Result<CheckpointMeta> {
    let meta_file = meta_path(path);
    let file = std::fs::File::open(&meta_file)
        .with_context(|| format!("Failed to open {}", meta_file.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("Failed to parse {}", meta_file.display()))
}
