//! Feed-forward neural network trained by backpropagation.
//!
//! The crate is organised leaves first: [`activations`] and [`loss`] hold the
//! scalar functions, a [`Unit`] owns one weight vector, a [`Layer`] groups
//! units that share an activation, and a [`Network`] chains layers and runs
//! online, batch or batch-normalized training.

// Modules
pub mod activations;
pub mod dataset;
pub mod error;
pub mod layer;
pub mod loss;
pub mod network;
pub mod network_config;
pub mod schedule;
pub mod snapshot;
pub mod statistics;
pub mod unit;

pub use activations::{ActivationFunction, ActivationType};
pub use dataset::{EpochReport, Sample, TrainingMode, TrainingSummary};
pub use error::{NetworkError, Result};
pub use layer::Layer;
pub use loss::{LossFunction, LossType};
pub use network::Network;
pub use network_config::{LayerConfig, NetworkConfig};
pub use schedule::{LabelEncoder, LearningRateSchedule};
pub use snapshot::{LayerSnapshot, NetworkSnapshot, NeuronSnapshot, NormalizationSnapshot};
pub use statistics::{BatchStatistics, RunningStatistics};
pub use unit::Unit;
