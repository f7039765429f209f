use thiserror::Error;

/// Errors raised by the numeric core.
///
/// `DimensionMismatch`, `InvalidTopology`, `MissingLossFunction` and
/// `MissingBiasChannel` describe a structurally invalid network. They are
/// returned before the failing call mutates anything, but the caller should
/// treat them as fatal. Unknown names in a persisted model are recoverable:
/// the restore is rejected and the network keeps its previous state.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("loss function required on output units")]
    MissingLossFunction,

    #[error("received inputs must start with the bias channel 1.0, got {0}")]
    MissingBiasChannel(f64),

    #[error("batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("unknown activation function: {0}")]
    UnknownActivationFunction(String),

    #[error("unknown loss function: {0}")]
    UnknownLossFunction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NetworkError {
    pub(crate) fn dimension(context: &'static str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            actual,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Returns `Err(DimensionMismatch)` unless `actual == expected`.
pub(crate) fn ensure_len(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(NetworkError::dimension(context, expected, actual))
    }
}
