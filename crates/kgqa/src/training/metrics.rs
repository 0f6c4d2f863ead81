//! Loss accounting and per-run training history.

/// Summed loss over the samples of one train phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningLoss {
    total: f64,
    samples: usize,
}

impl RunningLoss {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the summed loss of a batch of `batch_size` samples.
    pub fn update(&mut self, batch_loss: f64, batch_size: usize) {
        self.total += batch_loss;
        self.samples += batch_size;
    }

    /// Loss per sample seen so far, 0.0 before the first batch.
    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.total / self.samples as f64
    }
}

/// One finished train phase.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PhaseRecord {
    pub epoch: usize,
    /// Global train phase index, also the learning-rate decay step.
    pub phase: usize,
    pub lr: f64,
    pub mean_loss: f64,
}

/// One validation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ValidationRecord {
    pub epoch: usize,
    pub score: f64,
    pub improved: bool,
}

/// Everything logged during a run, in order.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct TrainingHistory {
    pub phases: Vec<PhaseRecord>,
    pub validations: Vec<ValidationRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }
}
