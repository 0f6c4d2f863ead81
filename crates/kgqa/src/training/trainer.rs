//! Epoch driver and the burn training loop.
//!
//! One epoch is `validate_every` passes over the training data followed by
//! one validation. [`run_schedule`] owns that control flow and the early
//! stopping decisions; [`train`] plugs a burn model, Adam and the data
//! loader into it.

use std::path::PathBuf;
use std::sync::Arc;

use burn::data::dataloader::DataLoader;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use metaqa::{PreparedEntities, QaRecord, Vocabulary};

use crate::eval::{evaluate, progress_bar, EvalOptions};
use crate::model::{EntityScorer, QaObjective};
use crate::training::checkpoint::{save_model, CheckpointMeta, CheckpointPaths};
use crate::training::data::{build_loader, loader_batches, LoaderOptions, QaBatcher, QaDataset};
use crate::training::metrics::{PhaseRecord, RunningLoss, TrainingHistory, ValidationRecord};
use crate::training::session::{StopReason, TrainingSession, ValidationDecision};

/// Configuration for a training run.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Initial Adam learning rate.
    #[config(default = 1e-4)]
    pub lr: f64,
    /// Learning-rate multiplier applied after every train phase.
    #[config(default = 1.0)]
    pub decay: f64,
    /// Maximum number of epochs.
    #[config(default = 90)]
    pub nb_epochs: usize,
    /// Validations without improvement tolerated before stopping.
    #[config(default = 5)]
    pub patience: usize,
    /// Train phases per epoch.
    #[config(default = 5)]
    pub validate_every: usize,
    /// Training mini-batch size.
    #[config(default = 1024)]
    pub batch_size: usize,
    /// Questions scored per forward pass during validation.
    #[config(default = 128)]
    pub eval_batch_size: usize,
    /// Data loader worker threads.
    #[config(default = 15)]
    pub num_workers: usize,
    /// Shuffle the training data every phase.
    #[config(default = true)]
    pub shuffle: bool,
    /// Seed for shuffling. Pass `n` shuffles with `seed + n`.
    #[config(default = 42)]
    pub seed: u64,
}

/// Learning rate after `step` decay steps: `base_lr * decay^step`.
pub fn exponential_lr(base_lr: f64, decay: f64, step: usize) -> f64 {
    base_lr * decay.powi(step.min(i32::MAX as usize) as i32)
}

/// How a training run ended.
#[derive(Debug, Clone)]
pub struct TrainOutcome<M> {
    pub reason: StopReason,
    /// Best validation score, `None` if validation never ran.
    pub best_score: Option<f64>,
    pub best_epoch: Option<usize>,
    pub epochs_run: usize,
    /// Best-score checkpoint written on termination.
    pub checkpoint: Option<PathBuf>,
    pub best_model: Option<M>,
    pub history: TrainingHistory,
}

/// The phases [`run_schedule`] drives.
pub trait PhaseRunner {
    type Model: Clone;

    /// One pass over the training data at `lr`. `phase` counts passes across
    /// the whole run. Returns mean loss per sample.
    fn train_phase(&mut self, epoch: usize, phase: usize, lr: f64) -> anyhow::Result<f64>;

    /// Validation accuracy of the current model.
    fn validate(&mut self) -> anyhow::Result<f64>;

    /// Current model, snapshotted on improvement.
    fn model(&self) -> &Self::Model;

    /// Called once per improved validation, after the snapshot.
    fn on_improved(&mut self, epoch: usize, score: f64) -> anyhow::Result<()>;

    /// Persist the best snapshot when training stops. Returns where it went.
    fn persist_best(
        &mut self,
        best: &Self::Model,
        epoch: usize,
        score: f64,
    ) -> anyhow::Result<PathBuf>;
}

/// Drive train/valid phases until the session signals termination.
pub fn run_schedule<R: PhaseRunner>(
    runner: &mut R,
    config: &TrainingConfig,
) -> anyhow::Result<TrainOutcome<R::Model>> {
    let mut history = TrainingHistory::new();
    if config.nb_epochs == 0 {
        tracing::info!("nb_epochs is 0, nothing to train");
        return Ok(TrainOutcome {
            reason: StopReason::NothingToRun,
            best_score: None,
            best_epoch: None,
            epochs_run: 0,
            checkpoint: None,
            best_model: None,
            history,
        });
    }

    let mut session = TrainingSession::new(config.patience, config.nb_epochs);
    let mut phase = 0usize;
    let mut epoch = 0usize;
    loop {
        for _ in 0..config.validate_every {
            let lr = exponential_lr(config.lr, config.decay, phase);
            let mean_loss = runner.train_phase(epoch, phase, lr)?;
            tracing::info!(
                epoch,
                phase,
                lr = %format!("{lr:.2e}"),
                loss = %format!("{mean_loss:.6}"),
                "Train phase finished"
            );
            history.phases.push(PhaseRecord {
                epoch,
                phase,
                lr,
                mean_loss,
            });
            phase += 1;
        }

        let score = runner.validate()?;
        let decision = session.observe(score, epoch, runner.model());
        history.validations.push(ValidationRecord {
            epoch,
            score,
            improved: decision.improved(),
        });
        match decision {
            ValidationDecision::NoImprovement { remaining } => {
                tracing::info!(
                    epoch,
                    score,
                    best = session.best_score(),
                    remaining,
                    "No improvement"
                );
            }
            _ => tracing::info!(epoch, score, best = session.best_score(), ?decision, "Validation"),
        }

        if decision.improved() {
            runner.on_improved(epoch, score)?;
        }

        if let Some(reason) = decision.stop_reason() {
            if reason == StopReason::PatienceExhausted {
                tracing::info!(epoch, patience = config.patience, "Early stopping");
            }
            let checkpoint = match (session.best_model(), session.best_epoch()) {
                (Some(best), Some(best_epoch)) => {
                    Some(runner.persist_best(best, best_epoch, session.best_score())?)
                }
                _ => None,
            };
            tracing::info!(
                ?reason,
                best_score = session.best_score(),
                epochs_run = epoch + 1,
                "Training stopped"
            );
            return Ok(TrainOutcome {
                reason,
                best_score: Some(session.best_score()),
                best_epoch: session.best_epoch(),
                epochs_run: epoch + 1,
                checkpoint,
                best_model: session.into_best_model(),
                history,
            });
        }
        epoch += 1;
    }
}

/// Everything a training run reads besides the model and hyperparameters.
pub struct TrainingRun<'a> {
    pub train: QaDataset,
    pub valid: &'a [QaRecord],
    /// Scored for monitoring whenever validation improves.
    pub test: Option<&'a [QaRecord]>,
    pub vocab: &'a Vocabulary,
    pub entities: &'a PreparedEntities,
    pub checkpoints: CheckpointPaths,
    /// Model name, kg variant and hop count recorded in checkpoint metadata.
    pub model_name: String,
    pub kg_type: String,
    pub hops: usize,
}

struct BurnRunner<'a, B: AutodiffBackend, M, O> {
    model: M,
    optimizer: O,
    dataset: Arc<QaDataset>,
    batcher: QaBatcher<B>,
    loader_options: LoaderOptions,
    shuffle: Option<u64>,
    run: RunContext<'a>,
    eval_options: EvalOptions,
    device: B::Device,
}

/// [`TrainingRun`] minus the training data.
struct RunContext<'a> {
    valid: &'a [QaRecord],
    test: Option<&'a [QaRecord]>,
    vocab: &'a Vocabulary,
    entities: &'a PreparedEntities,
    checkpoints: CheckpointPaths,
    model_name: String,
    kg_type: String,
    hops: usize,
}

impl RunContext<'_> {
    fn meta(&self, epoch: usize, score: f64) -> CheckpointMeta {
        CheckpointMeta {
            model: self.model_name.clone(),
            kg_type: self.kg_type.clone(),
            hops: self.hops,
            epoch,
            score,
            vocab_size: self.vocab.len(),
            num_entities: self.entities.len(),
        }
    }
}

impl<B, M, O> BurnRunner<'_, B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: EntityScorer<B::InnerBackend>,
{
    fn accuracy_on(&self, records: &[QaRecord]) -> anyhow::Result<f64> {
        let model = self.model.valid();
        let evaluation = evaluate::<B::InnerBackend, _>(
            &model,
            records,
            self.run.vocab,
            self.run.entities,
            &self.eval_options,
            &self.device,
        )?;
        Ok(evaluation.report.accuracy)
    }
}

impl<B, M, O> PhaseRunner for BurnRunner<'_, B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + QaObjective<B>,
    M::InnerModule: EntityScorer<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    type Model = M;

    fn train_phase(&mut self, epoch: usize, phase: usize, lr: f64) -> anyhow::Result<f64> {
        let options = LoaderOptions {
            shuffle_seed: self.shuffle.map(|seed| seed.wrapping_add(phase as u64)),
            ..self.loader_options
        };
        let loader = build_loader(self.batcher.clone(), self.dataset.clone(), options);
        let pb = progress_bar(loader_batches(self.dataset.len(), &options), "training");
        let mut running = RunningLoss::new();
        for batch in loader.iter() {
            let batch_size = batch.heads.dims()[0];
            let loss = self.model.loss(&batch);
            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                tracing::warn!(epoch, loss = loss_value, "Non-finite batch loss");
            }

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self.optimizer.step(lr, self.model.clone(), grads);

            running.update(loss_value, batch_size);
            pb.set_message(format!("epoch {epoch} loss {:.6}", running.mean()));
            pb.inc(1);
        }
        pb.finish_and_clear();
        Ok(running.mean())
    }

    fn validate(&mut self) -> anyhow::Result<f64> {
        self.accuracy_on(self.run.valid)
    }

    fn model(&self) -> &M {
        &self.model
    }

    fn on_improved(&mut self, epoch: usize, score: f64) -> anyhow::Result<()> {
        let meta = self.run.meta(epoch, score);
        save_model::<B, M>(&self.model, &self.run.checkpoints.improved, &meta)?;
        if let Some(test) = self.run.test {
            let test_score = self.accuracy_on(test)?;
            tracing::info!(epoch, valid = score, test = test_score, "Test accuracy at new best");
        }
        Ok(())
    }

    fn persist_best(&mut self, best: &M, epoch: usize, score: f64) -> anyhow::Result<PathBuf> {
        let path = self.run.checkpoints.best.clone();
        save_model::<B, M>(best, &path, &self.run.meta(epoch, score))?;
        Ok(path)
    }
}

/// Train `model` with Adam until early stopping or the last epoch.
///
/// Returns the best validated model and the path of its checkpoint. The
/// caller decides what to do next; this never exits the process.
pub fn train<B, M>(
    config: &TrainingConfig,
    model: M,
    run: TrainingRun<'_>,
    device: &B::Device,
) -> anyhow::Result<TrainOutcome<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + QaObjective<B>,
    M::InnerModule: EntityScorer<B::InnerBackend>,
{
    let TrainingRun {
        train,
        valid,
        test,
        vocab,
        entities,
        checkpoints,
        model_name,
        kg_type,
        hops,
    } = run;

    let num_entities = model.num_entities();
    if num_entities != entities.len() {
        anyhow::bail!(
            "model scores {num_entities} entities but the entity index has {}",
            entities.len()
        );
    }
    let loader_options = LoaderOptions {
        batch_size: config.batch_size.max(1),
        shuffle_seed: None,
        num_workers: config.num_workers,
    };
    let num_batches = loader_batches(train.len(), &loader_options);
    tracing::info!(
        train = train.len(),
        valid = valid.len(),
        batches = num_batches,
        lr = config.lr,
        decay = config.decay,
        nb_epochs = config.nb_epochs,
        patience = config.patience,
        "Starting training"
    );

    let mut runner = BurnRunner {
        model,
        optimizer: AdamConfig::new().init::<B, M>(),
        dataset: Arc::new(train),
        batcher: QaBatcher::<B>::new(device.clone(), num_entities),
        loader_options,
        shuffle: config.shuffle.then_some(config.seed),
        run: RunContext {
            valid,
            test,
            vocab,
            entities,
            checkpoints,
            model_name,
            kg_type,
            hops,
        },
        eval_options: EvalOptions {
            batch_size: config.eval_batch_size,
            keep_candidates: 0,
        },
        device: device.clone(),
    };
    run_schedule(&mut runner, config)
}
