use perceptron::NetworkError;
use thiserror::Error;

/// Errors raised while driving a training run.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot evaluate on an empty sample set")]
    EmptyEvaluationSet,

    #[error("label {label} is outside the {classes} known classes")]
    LabelOutOfRange { label: usize, classes: usize },

    #[error("invalid holdout fraction {0}, expected a value in [0, 1)")]
    InvalidHoldout(f64),
}

pub type Result<T> = std::result::Result<T, TrainingError>;
