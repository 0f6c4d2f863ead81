//! Train and test pipelines.

use std::path::PathBuf;

use anyhow::Context;
use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use burn::prelude::*;

use kgqa::eval::{write_candidates, write_predictions, DUMP_TOP_K};
use kgqa::{
    evaluate, load_model, train, CheckpointPaths, EvalOptions, KgScoring, QaDataset,
    RelationExtractorConfig, TrainingConfig, TrainingRun,
};
use metaqa::{
    load_core_tensor, load_embeddings, read_qa_file, CoreTensor, DictLayout, EntityIndex,
    PreparedEntities, QaRecord, Vocabulary,
};

use crate::config::DataPaths;
use crate::results::{append_result, ResultRow};

type TrainBackend = Autodiff<NdArray<f32>>;
type InferenceBackend = NdArray<f32>;

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Train with early stopping and write checkpoints.
    Train,
    /// Evaluate the best-score checkpoint on the test split.
    Test,
}

/// Model hyperparameters from the command line.
#[derive(Debug, Clone)]
pub struct ModelArgs {
    pub scoring: KgScoring,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub relation_dim: usize,
    pub dropout: f64,
    pub entdrop: f64,
    pub reldrop: f64,
    pub scoredrop: f64,
    pub ls: f64,
    pub l3_reg: f64,
    pub freeze: bool,
}

impl ModelArgs {
    fn config(&self, vocab_size: usize) -> RelationExtractorConfig {
        RelationExtractorConfig::new(vocab_size)
            .with_scoring(self.scoring)
            .with_embedding_dim(self.embedding_dim)
            .with_hidden_dim(self.hidden_dim)
            .with_relation_dim(self.relation_dim)
            .with_dropout(self.dropout)
            .with_entdrop(self.entdrop)
            .with_reldrop(self.reldrop)
            .with_scoredrop(self.scoredrop)
            .with_ls(self.ls)
            .with_l3_reg(self.l3_reg)
            .with_freeze(self.freeze)
    }
}

/// Everything a run needs, after CLI and config file are merged.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub hops: usize,
    pub kg_type: String,
    pub model: ModelArgs,
    pub training: TrainingConfig,
    pub dict_layout: DictLayout,
    pub split_answers: bool,
    pub paths: DataPaths,
    /// JSON Lines dump of the top candidates per test question.
    pub dump_candidates: Option<PathBuf>,
    /// Per-question predictions from test mode.
    pub write_predictions: Option<PathBuf>,
}

impl RunArgs {
    fn model_name(&self) -> String {
        self.model.scoring.to_string()
    }

    fn checkpoint_paths(&self) -> CheckpointPaths {
        CheckpointPaths::new(
            &self.paths.checkpoint_dir,
            &self.model_name(),
            self.hops,
            self.model.freeze,
            &self.kg_type,
        )
    }
}

/// Inputs shared by both modes.
struct Inputs {
    vocab: Vocabulary,
    entities: PreparedEntities,
    /// TuckER core tensor; `None` for the other scoring functions.
    core: Option<CoreTensor>,
    train: Vec<QaRecord>,
    valid: Vec<QaRecord>,
    test: Vec<QaRecord>,
}

/// The pretrained relation embeddings must have the width the question
/// encoder is trained to produce.
fn check_relation_width(
    scoring: KgScoring,
    relation_dim: usize,
    relations_dim: usize,
) -> anyhow::Result<()> {
    let expected = scoring.relation_width(relation_dim);
    if relations_dim != expected {
        anyhow::bail!(
            "{scoring} with --relation-dim {relation_dim} produces relations of width {expected}, \
             but the relation embeddings have width {relations_dim}"
        );
    }
    Ok(())
}

/// Load embeddings, dictionaries and question files.
///
/// The relation dictionary and matrix are only read to check that
/// `--relation-dim` matches the pretrained embedding; questions are encoded
/// into relation space by the model.
fn load_inputs(args: &RunArgs) -> anyhow::Result<Inputs> {
    let paths = &args.paths;

    let entity_matrix = load_embeddings(&paths.entity_embeddings)?;
    let entities = EntityIndex::from_dict_file(&paths.entity_dict, &entity_matrix, args.dict_layout)
        .with_context(|| format!("reading {}", paths.entity_dict.display()))?
        .prepare();
    let relation_matrix = load_embeddings(&paths.relation_embeddings)?;
    let relations =
        EntityIndex::from_dict_file(&paths.relation_dict, &relation_matrix, args.dict_layout)
            .with_context(|| format!("reading {}", paths.relation_dict.display()))?;
    tracing::info!(
        entities = entities.len(),
        entity_dim = entities.matrix.dim(),
        relations = relations.len(),
        relation_dim = relations.dim(),
        "Indexed knowledge graph embeddings"
    );
    check_relation_width(args.model.scoring, args.model.relation_dim, relations.dim())
        .with_context(|| format!("checking {}", paths.relation_embeddings.display()))?;

    let core = if args.model.scoring.needs_core() {
        if !paths.transform_matrix.exists() {
            anyhow::bail!(
                "{} scoring needs a core tensor at {}",
                args.model.scoring,
                paths.transform_matrix.display()
            );
        }
        Some(load_core_tensor(&paths.transform_matrix)?)
    } else {
        if paths.transform_matrix.exists() {
            tracing::info!(
                path = %paths.transform_matrix.display(),
                "Found a core tensor; {} scoring does not use it",
                args.model.scoring
            );
        }
        None
    };

    let train = read_qa_file(&paths.train, args.split_answers)?;
    let valid = read_qa_file(&paths.valid, false)?;
    let test = read_qa_file(&paths.test, false)?;

    // The vocabulary always comes from the training split so that test mode
    // sees the token ids the checkpoint was trained with.
    let vocab = Vocabulary::build(&train);
    tracing::info!(size = vocab.len(), max_len = vocab.max_len(), "Built vocabulary");

    Ok(Inputs {
        vocab,
        entities,
        core,
        train,
        valid,
        test,
    })
}

/// Train a model with early stopping.
pub fn run_train(args: RunArgs) -> anyhow::Result<()> {
    let inputs = load_inputs(&args)?;
    let device = NdArrayDevice::default();
    TrainBackend::seed(args.training.seed);

    let dataset = QaDataset::encode_all(&inputs.train, &inputs.vocab, &inputs.entities)
        .with_context(|| format!("encoding {}", args.paths.train.display()))?;
    let model = args
        .model
        .config(inputs.vocab.len())
        .init_with_core::<TrainBackend>(&inputs.entities.matrix, inputs.core.as_ref(), &device)?;

    let outcome = train::<TrainBackend, _>(
        &args.training,
        model,
        TrainingRun {
            train: dataset,
            valid: &inputs.valid,
            test: Some(&inputs.test),
            vocab: &inputs.vocab,
            entities: &inputs.entities,
            checkpoints: args.checkpoint_paths(),
            model_name: args.model_name(),
            kg_type: args.kg_type.clone(),
            hops: args.hops,
        },
        &device,
    )?;

    tracing::info!(
        reason = ?outcome.reason,
        best_score = ?outcome.best_score,
        best_epoch = ?outcome.best_epoch,
        epochs_run = outcome.epochs_run,
        checkpoint = ?outcome.checkpoint,
        "Training finished"
    );
    Ok(())
}

/// Evaluate the best-score checkpoint on the test split and record the result.
pub fn run_test(args: RunArgs) -> anyhow::Result<()> {
    let inputs = load_inputs(&args)?;
    let device = NdArrayDevice::default();

    let checkpoint = args.checkpoint_paths().best;
    let model = args
        .model
        .config(inputs.vocab.len())
        .init_with_core::<InferenceBackend>(
            &inputs.entities.matrix,
            inputs.core.as_ref(),
            &device,
        )?;
    let model = load_model(model, &checkpoint, &device)?;

    let options = EvalOptions {
        batch_size: args.training.eval_batch_size,
        keep_candidates: if args.dump_candidates.is_some() {
            DUMP_TOP_K
        } else {
            0
        },
    };
    let evaluation = evaluate(
        &model,
        &inputs.test,
        &inputs.vocab,
        &inputs.entities,
        &options,
        &device,
    )?;
    let report = evaluation.report;
    tracing::info!(
        model = %args.model_name(),
        kg_type = %args.kg_type,
        hops = args.hops,
        accuracy = report.accuracy,
        hits_at_1 = report.hits_at_1,
        hits_at_5 = report.hits_at_5,
        hits_at_10 = report.hits_at_10,
        errors = report.errors,
        "Test results"
    );

    if let Some(path) = &args.dump_candidates {
        write_candidates(path, &evaluation.outcomes, &inputs.entities)?;
    }
    if let Some(path) = &args.write_predictions {
        write_predictions(path, &evaluation.outcomes)?;
    }
    append_result(
        &args.paths.results_csv,
        &ResultRow::new(&args.model_name(), &args.kg_type, args.hops, &report),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_paths, PathFlags, PathOverrides};
    use ndarray::Array2;
    use ndarray_npy::write_npy;

    /// Writes a 1-hop MetaQA-shaped dataset with 2-d DistMult embeddings.
    fn write_dataset(root: &std::path::Path) {
        let data = root.join("MetaQA");
        std::fs::create_dir_all(data.join("raw")).unwrap();
        std::fs::write(
            data.join("raw/entities.dict"),
            "0\tTop Hat\n1\tMark Sandrich\n2\tKitty Foyle\n3\tSam Wood\n",
        )
        .unwrap();
        std::fs::write(data.join("raw/relations.dict"), "0\tdirected_by\n").unwrap();
        let qa = "who directed [Top Hat]\tMark Sandrich\nwho directed [Kitty Foyle]\tSam Wood\n";
        std::fs::write(data.join("qa_train_1hop.txt"), qa).unwrap();
        std::fs::write(data.join("qa_dev_1hop.txt"), qa).unwrap();
        std::fs::write(
            data.join("qa_test_1hop.txt"),
            format!("{qa}who wrote [Top Hat]\tMark Sandrich\n"),
        )
        .unwrap();

        let e = Array2::from_shape_vec((4, 2), vec![1.0f32, 0.0, 0.0, 1.0, -1.0, 0.0, 0.0, -1.0])
            .unwrap();
        write_npy(root.join("E.npy"), &e).unwrap();
        write_npy(root.join("R.npy"), &Array2::<f32>::ones((1, 2))).unwrap();
    }

    fn args(root: &std::path::Path) -> RunArgs {
        let flags = PathFlags {
            data_dir: Some(root.join("MetaQA")),
            embeddings_dir: Some(root.to_path_buf()),
            checkpoint_dir: Some(root.join("checkpoints")),
            results_csv: Some(root.join("final_results.csv")),
        };
        RunArgs {
            hops: 1,
            kg_type: "full".into(),
            model: ModelArgs {
                scoring: KgScoring::DistMult,
                embedding_dim: 4,
                hidden_dim: 4,
                relation_dim: 2,
                dropout: 0.0,
                entdrop: 0.0,
                reldrop: 0.0,
                scoredrop: 0.0,
                ls: 0.0,
                l3_reg: 0.0,
                freeze: true,
            },
            training: TrainingConfig::new()
                .with_nb_epochs(2)
                .with_validate_every(1)
                .with_batch_size(2)
                .with_num_workers(0),
            dict_layout: DictLayout::IdName,
            split_answers: false,
            paths: resolve_paths(&PathOverrides::default(), &flags, 1, "full"),
            dump_candidates: Some(root.join("candidates.jsonl")),
            write_predictions: Some(root.join("predictions.txt")),
        }
    }

    #[test]
    fn test_train_then_test() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_dataset(tmp.path());
        let args = args(tmp.path());

        run_train(args.clone()).unwrap();
        assert!(tmp
            .path()
            .join("checkpoints/DistMult_1__frozen_full.chkpt")
            .exists());
        assert!(tmp
            .path()
            .join("checkpoints/DistMult_1__full_best_score_model.chkpt")
            .exists());

        run_test(args).unwrap();
        let csv = std::fs::read_to_string(tmp.path().join("final_results.csv")).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(csv.starts_with("DistMult,full,1,"));
        // "wrote" is not in the training vocabulary: counted as an error, not scored.
        let predictions = std::fs::read_to_string(tmp.path().join("predictions.txt")).unwrap();
        assert_eq!(predictions.lines().count(), 2);
        let dump = std::fs::read_to_string(tmp.path().join("candidates.jsonl")).unwrap();
        assert_eq!(dump.lines().count(), 2);
    }

    #[test]
    fn test_tucker_trains_with_core_tensor() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_dataset(tmp.path());
        let mut args = args(tmp.path());
        args.model.scoring = KgScoring::TuckER;
        args.model.relation_dim = 2;

        // Without W.npy the run is rejected before training.
        let err = run_train(args.clone()).unwrap_err();
        assert!(err.to_string().contains("W.npy"), "{err:#}");

        let w = ndarray::Array3::from_shape_fn((2, 2, 2), |(j, i, k)| {
            if i == k {
                1.0_f32 + j as f32
            } else {
                0.0
            }
        });
        write_npy(tmp.path().join("W.npy"), &w).unwrap();
        run_train(args.clone()).unwrap();
        assert!(tmp
            .path()
            .join("checkpoints/TuckER_1__full_best_score_model.chkpt")
            .exists());
        run_test(args).unwrap();
        let csv = std::fs::read_to_string(tmp.path().join("final_results.csv")).unwrap();
        assert!(csv.starts_with("TuckER,full,1,"));
    }

    #[test]
    fn test_relation_width_is_checked() {
        assert!(check_relation_width(KgScoring::ComplEx, 30, 60).is_ok());
        assert!(check_relation_width(KgScoring::DistMult, 30, 30).is_ok());
        assert!(check_relation_width(KgScoring::TuckER, 30, 30).is_ok());
        assert!(check_relation_width(KgScoring::ComplEx, 30, 30).is_err());

        let tmp = tempfile::TempDir::new().unwrap();
        write_dataset(tmp.path());
        let mut args = args(tmp.path());
        args.model.relation_dim = 3;
        let err = run_train(args).unwrap_err();
        assert!(format!("{err:#}").contains("relation embeddings have width 2"), "{err:#}");
        assert!(!tmp.path().join("checkpoints").exists());
    }

    #[test]
    fn test_missing_checkpoint_is_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_dataset(tmp.path());
        assert!(run_test(args(tmp.path())).is_err());
    }
}
