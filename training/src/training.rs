//! Training loop for the perceptron network.
//!
//! This module provides the training infrastructure around a [`Network`]:
//! - Accuracy measurement after every epoch, on a validation set when given
//! - Early stopping on an accuracy plateau
//! - Progress visualization using progress bars
//! - Model persistence through save/load functionality

use crate::error::Result;
use crate::evaluation::{accuracy, one_hot};
use crate::training_config::TrainingConfig;
use crate::training_history::{StopReason, TrainingHistory};
use indicatif::{ProgressBar, ProgressStyle};
use perceptron::{LearningRateSchedule, Network, NetworkConfig, Sample};
use std::path::Path;

/// Trainer manages the neural network training process.
///
/// The trainer handles:
/// - Training loop execution in the configured mode
/// - Early stopping
/// - Progress visualization
/// - Model persistence
#[derive(Debug)]
pub struct Trainer {
    network: Network,
    config: TrainingConfig,
    history: TrainingHistory,
}

impl Trainer {
    pub fn new(network: Network, config: TrainingConfig) -> Self {
        Self {
            network,
            config,
            history: TrainingHistory::new(),
        }
    }

    /// Builds a classifier from a network configuration, one-hot encoding
    /// labels over the output layer.
    pub fn from_config(
        network_config: &NetworkConfig,
        config: TrainingConfig,
        schedule: LearningRateSchedule,
    ) -> Result<Self> {
        let classes = network_config.layer_sizes().last().copied().unwrap_or_default();
        let network = Network::new(network_config, one_hot(classes), schedule)?;
        Ok(Self::new(network, config))
    }

    /// Returns the training history containing accuracy and loss metrics
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn into_network(self) -> Network {
        self.network
    }

    /// Trains the network on `training` for up to the network's epoch limit.
    ///
    /// Accuracy is measured on `validation` when given, otherwise on the
    /// training samples. Stops early when the network reports its acceptable
    /// accuracy or when accuracy has not improved by `early_stopping_min_delta`
    /// for `early_stopping_patience` epochs.
    pub fn train(&mut self, training: &[Sample], validation: Option<&[Sample]>) -> Result<&TrainingHistory> {
        let evaluation_set = validation.unwrap_or(training);
        let max_epochs = self.network.max_epochs();
        let mode = self.config.mode;

        let epoch_progress = if self.config.show_progress {
            ProgressBar::new(max_epochs as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Some(style) = create_progress_style(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} Epoch {msg}",
        ) {
            epoch_progress.set_style(style);
        }

        tracing::info!(%mode, samples = training.len(), max_epochs, "starting training");

        let mut best_accuracy = f64::NEG_INFINITY;
        let mut patience_counter = 0;

        for _ in 0..max_epochs {
            let report = self.network.train_one_epoch(training, mode)?;
            let epoch_accuracy = accuracy(&self.network, evaluation_set)?;
            self.history.record_epoch(report.epoch, epoch_accuracy, report.mean_loss);

            epoch_progress.set_message(format!(
                "- Accuracy: {:.2}%, Loss: {:.4}",
                epoch_accuracy * 100.0,
                report.mean_loss
            ));
            epoch_progress.inc(1);
            tracing::info!(
                epoch = report.epoch,
                loss = report.mean_loss,
                accuracy = epoch_accuracy,
                "epoch finished"
            );

            if self.network.end_epoch(report.epoch, epoch_accuracy) {
                self.history.stopped_early = Some(StopReason::TargetReached);
                epoch_progress.finish_with_message(format!(
                    "Reached acceptable accuracy at epoch {}: {:.2}%",
                    report.epoch,
                    epoch_accuracy * 100.0
                ));
                return Ok(&self.history);
            }

            // Early stopping check
            if epoch_accuracy > best_accuracy + self.config.early_stopping_min_delta {
                best_accuracy = epoch_accuracy;
                patience_counter = 0;
            } else if self.config.early_stopping_patience > 0 {
                patience_counter += 1;
                if patience_counter >= self.config.early_stopping_patience {
                    self.history.stopped_early = Some(StopReason::Plateau);
                    tracing::info!(epoch = report.epoch, best_accuracy, "early stopping");
                    epoch_progress.finish_with_message(format!(
                        "Early stopping at epoch {} with best accuracy: {:.2}%",
                        report.epoch,
                        best_accuracy * 100.0
                    ));
                    return Ok(&self.history);
                }
            }
        }

        epoch_progress.finish_with_message("Training completed!");
        Ok(&self.history)
    }

    /// Saves the trained network to a file in JSON format.
    pub fn save_network<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        Ok(self.network.save(path)?)
    }

    /// Rebuilds a classifier from `network_config` and restores saved
    /// weights into it.
    pub fn load_network<P: AsRef<Path>>(
        path: P,
        network_config: &NetworkConfig,
        config: TrainingConfig,
        schedule: LearningRateSchedule,
    ) -> Result<Self> {
        let mut trainer = Self::from_config(network_config, config, schedule)?;
        trainer.network.load_weights(path)?;
        Ok(trainer)
    }
}

/// Creates a progress bar style with the specified template.
fn create_progress_style(template: &str) -> Option<ProgressStyle> {
    match ProgressStyle::with_template(template) {
        Ok(style) => Some(style.progress_chars("##-")),
        Err(error) => {
            tracing::warn!(%error, "invalid progress template");
            None
        }
    }
}
