use crate::error::Result;
use perceptron::TrainingMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration parameters for a training run.
///
/// Topology, learning rate and the epoch limit live in the network's own
/// configuration. This record only covers how the run is driven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// How weight updates are scheduled within an epoch
    #[serde(default)]
    pub mode: TrainingMode,
    /// Number of epochs to wait for improvement before early stopping, 0 disables it
    pub early_stopping_patience: usize,
    /// Minimum improvement in accuracy required to reset patience counter
    pub early_stopping_min_delta: f64,
    /// Draw a progress bar on the terminal
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_show_progress() -> bool {
    true
}

impl TrainingConfig {
    /// Loads a training configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&config_str)?)
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            mode: TrainingMode::Online,
            early_stopping_patience: 5,
            early_stopping_min_delta: 0.001,
            show_progress: true,
        }
    }
}
