use serde::{Deserialize, Serialize};
use std::fmt;

/// One labelled training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: Vec<f64>,
    pub label: usize,
}

impl Sample {
    pub fn new(input: Vec<f64>, label: usize) -> Self {
        Self { input, label }
    }
}

/// How weight updates are scheduled within an epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainingMode {
    /// Forward, backward and weight update after every sample.
    #[default]
    Online,
    /// One update per batch from batch-mean targets, predictions and inputs.
    Batch { batch_size: usize },
    /// Batch mode with per-layer input standardization and learned α/β.
    BatchNormalized { batch_size: usize },
}

impl TrainingMode {
    /// Samples per weight update.
    pub fn batch_size(&self) -> usize {
        match self {
            TrainingMode::Online => 1,
            TrainingMode::Batch { batch_size } | TrainingMode::BatchNormalized { batch_size } => {
                *batch_size
            }
        }
    }

    pub fn is_batch_normalized(&self) -> bool {
        matches!(self, TrainingMode::BatchNormalized { .. })
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingMode::Online => write!(f, "online"),
            TrainingMode::Batch { batch_size } => write!(f, "batch({batch_size})"),
            TrainingMode::BatchNormalized { batch_size } => {
                write!(f, "batch-normalized({batch_size})")
            }
        }
    }
}

/// Result of one pass over the training set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// 1-based epoch number
    pub epoch: usize,
    /// Mean over samples of the summed per-output loss
    pub mean_loss: f64,
    pub samples: usize,
    /// Number of weight updates performed
    pub updates: usize,
}

/// Outcome of [`Network::train`](crate::Network::train).
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    /// Accuracy returned by the callback after each epoch
    pub accuracies: Vec<f64>,
    pub losses: Vec<f64>,
    /// True when training stopped on the acceptable-accuracy threshold
    pub reached_target: bool,
}

impl TrainingSummary {
    pub fn final_accuracy(&self) -> Option<f64> {
        self.accuracies.last().copied()
    }
}
