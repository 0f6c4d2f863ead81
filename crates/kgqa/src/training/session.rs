//! Early-stopping state for one training run.

/// Minimum gain over the best validation score that counts as an improvement.
pub const IMPROVEMENT_EPS: f64 = 1e-4;

/// Why a training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum StopReason {
    /// `patience` validations in a row without improvement.
    PatienceExhausted,
    /// The last configured epoch was validated.
    FinalEpoch,
    /// `nb_epochs` was zero.
    NothingToRun,
}

/// Result of feeding one validation score to a [`TrainingSession`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationDecision {
    /// New best score; the caller persists the improved model.
    Improved { previous: f64 },
    /// No improvement, `remaining` more such validations are tolerated.
    NoImprovement { remaining: usize },
    /// No improvement and patience is used up. Terminal.
    PatienceExhausted,
    /// The last epoch was validated. Terminal, whatever the score did.
    FinalEpoch { improved: bool },
}

impl ValidationDecision {
    pub fn improved(&self) -> bool {
        matches!(
            self,
            ValidationDecision::Improved { .. } | ValidationDecision::FinalEpoch { improved: true }
        )
    }

    /// Stop reason for terminal decisions.
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            ValidationDecision::PatienceExhausted => Some(StopReason::PatienceExhausted),
            ValidationDecision::FinalEpoch { .. } => Some(StopReason::FinalEpoch),
            _ => None,
        }
    }
}

/// Best score, best model snapshot and the no-improvement counter.
///
/// Created fresh for every run and mutated only by [`TrainingSession::observe`].
#[derive(Debug, Clone)]
pub struct TrainingSession<M> {
    best_score: f64,
    best_epoch: Option<usize>,
    best_model: Option<M>,
    no_update: usize,
    patience: usize,
    nb_epochs: usize,
}

impl<M: Clone> TrainingSession<M> {
    pub fn new(patience: usize, nb_epochs: usize) -> Self {
        Self {
            best_score: f64::NEG_INFINITY,
            best_epoch: None,
            best_model: None,
            no_update: 0,
            patience,
            nb_epochs,
        }
    }

    /// Record the validation score of `epoch`.
    ///
    /// An improvement snapshots `model`. The final epoch always yields
    /// [`ValidationDecision::FinalEpoch`], after the improvement (if any) has
    /// been recorded.
    pub fn observe(&mut self, score: f64, epoch: usize, model: &M) -> ValidationDecision {
        let decision = if score > self.best_score + IMPROVEMENT_EPS {
            let previous = self.best_score;
            self.best_score = score;
            self.best_epoch = Some(epoch);
            self.best_model = Some(model.clone());
            self.no_update = 0;
            ValidationDecision::Improved { previous }
        } else if self.no_update < self.patience {
            self.no_update += 1;
            ValidationDecision::NoImprovement {
                remaining: self.patience - self.no_update,
            }
        } else {
            ValidationDecision::PatienceExhausted
        };

        if epoch + 1 >= self.nb_epochs {
            return ValidationDecision::FinalEpoch {
                improved: decision.improved(),
            };
        }
        decision
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_model(&self) -> Option<&M> {
        self.best_model.as_ref()
    }

    pub fn into_best_model(self) -> Option<M> {
        self.best_model
    }

    pub fn no_update(&self) -> usize {
        self.no_update
    }

    pub fn patience(&self) -> usize {
        self.patience
    }
}
