mod config;
mod pipeline;
pub mod results;

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use kgqa::{KgScoring, TrainingConfig};
use metaqa::DictLayout;

use config::{load_config_toml, resolve_paths, PathFlags, PathOverrides};
use pipeline::{Mode, ModelArgs, RunArgs};

/// embedkgqa: train and evaluate KG-embedding question answering on MetaQA.
#[derive(Parser, Debug)]
#[command(name = "embedkgqa", version, about)]
struct Cli {
    /// Train a model or evaluate the best checkpoint.
    #[arg(long, value_enum, default_value_t = Mode::Train)]
    mode: Mode,
    /// Number of hops of the MetaQA questions (1, 2 or 3).
    #[arg(long, default_value_t = 1)]
    hops: usize,
    /// Scoring function of the pretrained embeddings (ComplEx, DistMult or TuckER).
    #[arg(long, default_value_t = KgScoring::ComplEx)]
    model: KgScoring,
    /// KG variant: "half" trains on the `_half` question file.
    #[arg(long, default_value = "half")]
    kg_type: String,
    #[arg(long, default_value_t = 1024)]
    batch_size: usize,
    /// Dropout inside the question encoder.
    #[arg(long, default_value_t = 0.1)]
    dropout: f64,
    /// Dropout on head entity embeddings.
    #[arg(long, default_value_t = 0.0)]
    entdrop: f64,
    /// Dropout on question relation embeddings.
    #[arg(long, default_value_t = 0.0)]
    reldrop: f64,
    /// Dropout on the head/relation product.
    #[arg(long, default_value_t = 0.0)]
    scoredrop: f64,
    /// Weight of the L3 penalty on entity embeddings.
    #[arg(long, default_value_t = 0.0)]
    l3_reg: f64,
    /// Label smoothing.
    #[arg(long, default_value_t = 0.0)]
    ls: f64,
    #[arg(long, default_value_t = 1e-4)]
    lr: f64,
    /// Learning-rate multiplier applied after every train phase.
    #[arg(long, default_value_t = 1.0)]
    decay: f64,
    #[arg(long, default_value_t = 90)]
    nb_epochs: usize,
    /// Validations without improvement before stopping early.
    #[arg(long, default_value_t = 5)]
    patience: usize,
    /// Train phases per validation.
    #[arg(long, default_value_t = 5)]
    validate_every: usize,
    #[arg(long, default_value_t = 256)]
    embedding_dim: usize,
    #[arg(long, default_value_t = 200)]
    hidden_dim: usize,
    /// Relation dimension of the pretrained embeddings.
    #[arg(long, default_value_t = 30)]
    relation_dim: usize,
    /// Keep pretrained entity embeddings fixed.
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    freeze: bool,
    /// GPU ordinal. The CPU build ignores it.
    #[arg(long)]
    gpu: Option<usize>,
    /// Data loader worker threads.
    #[arg(long, default_value_t = 15)]
    num_workers: usize,
    /// Shuffle training data every phase.
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    shuffle_data: bool,
    /// Seed for weight init and shuffling. Random if unset.
    #[arg(long)]
    seed: Option<u64>,
    /// Column order of the dictionary files.
    #[arg(long, default_value_t = DictLayout::IdName)]
    dict_layout: DictLayout,
    /// Questions scored per forward pass during evaluation.
    #[arg(long, default_value_t = 128)]
    eval_batch_size: usize,
    /// Train on one row per gold answer.
    #[arg(long)]
    split_answers: bool,
    /// Directory with MetaQA question files and `raw/` dictionaries.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Directory with `E.npy` and `R.npy`.
    #[arg(long)]
    embeddings_dir: Option<PathBuf>,
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
    /// CSV file test results are appended to.
    #[arg(long)]
    results_csv: Option<PathBuf>,
    /// Write the top candidates per test question as JSON Lines.
    #[arg(long)]
    dump_candidates: Option<PathBuf>,
    /// Write per-question test predictions.
    #[arg(long)]
    write_predictions: Option<PathBuf>,
    /// TOML file with a `[paths]` table.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_run_args(self, overrides: &PathOverrides) -> RunArgs {
        let flags = PathFlags {
            data_dir: self.data_dir,
            embeddings_dir: self.embeddings_dir,
            checkpoint_dir: self.checkpoint_dir,
            results_csv: self.results_csv,
        };
        let seed = self.seed.unwrap_or_else(rand::random);
        RunArgs {
            hops: self.hops,
            paths: resolve_paths(overrides, &flags, self.hops, &self.kg_type),
            kg_type: self.kg_type,
            model: ModelArgs {
                scoring: self.model,
                embedding_dim: self.embedding_dim,
                hidden_dim: self.hidden_dim,
                relation_dim: self.relation_dim,
                dropout: self.dropout,
                entdrop: self.entdrop,
                reldrop: self.reldrop,
                scoredrop: self.scoredrop,
                ls: self.ls,
                l3_reg: self.l3_reg,
                freeze: self.freeze,
            },
            training: TrainingConfig::new()
                .with_lr(self.lr)
                .with_decay(self.decay)
                .with_nb_epochs(self.nb_epochs)
                .with_patience(self.patience)
                .with_validate_every(self.validate_every)
                .with_batch_size(self.batch_size)
                .with_eval_batch_size(self.eval_batch_size)
                .with_num_workers(self.num_workers)
                .with_shuffle(self.shuffle_data)
                .with_seed(seed),
            dict_layout: self.dict_layout,
            split_answers: self.split_answers,
            dump_candidates: self.dump_candidates,
            write_predictions: self.write_predictions,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let overrides = match &cli.config {
        Some(path) => load_config_toml(path)?.paths,
        None => PathOverrides::default(),
    };
    if let Some(gpu) = cli.gpu {
        tracing::info!(gpu, "Built with the CPU NdArray backend; --gpu is ignored");
    }

    let mode = cli.mode;
    let args = cli.into_run_args(&overrides);
    tracing::info!(
        ?mode,
        model = %args.model.scoring,
        hops = args.hops,
        kg_type = %args.kg_type,
        freeze = args.model.freeze,
        seed = args.training.seed,
        "Starting"
    );

    match mode {
        Mode::Train => pipeline::run_train(args),
        Mode::Test => pipeline::run_test(args),
    }
}
