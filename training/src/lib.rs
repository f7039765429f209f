mod error;
pub mod evaluation;
mod training;
mod training_config;
mod training_history;

pub use error::{Result, TrainingError};
pub use evaluation::{accuracy, holdout_split, one_hot, predicted_class, ConfusionMatrix};
pub use training::Trainer;
pub use training_config::TrainingConfig;
pub use training_history::{StopReason, TrainingHistory};

pub mod prelude {
    pub use crate::ConfusionMatrix;
    pub use crate::Trainer;
    pub use crate::TrainingConfig;
    pub use crate::TrainingHistory;
    pub use perceptron::{NetworkConfig, Sample, TrainingMode};
}
