//! Per-feature batch statistics for batch-normalized training.

use crate::error::{ensure_len, NetworkError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Default weight of the previous running estimate when a new batch is folded in.
pub const DEFAULT_MOMENTUM: f64 = 0.9;

/// Mean and standard deviation of each input feature over one batch.
///
/// A zero deviation (a constant feature) is stored as 1.0 so that
/// normalization leaves the centred value at zero instead of dividing by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    mean: Vec<f64>,
    deviation: Vec<f64>,
}

impl BatchStatistics {
    /// Builds statistics from explicit vectors.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::DimensionMismatch`] when the two lengths differ.
    pub fn new(mean: Vec<f64>, deviation: Vec<f64>) -> Result<Self> {
        ensure_len("batch deviation", mean.len(), deviation.len())?;
        let deviation = deviation.into_iter().map(guard_deviation).collect();
        Ok(Self { mean, deviation })
    }

    /// Computes population mean and deviation column-wise over `samples`.
    ///
    /// # Arguments
    ///
    /// * `samples` - One row per sample, all of the same width
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::EmptyDataset`] for an empty batch and
    /// [`NetworkError::DimensionMismatch`] for ragged rows.
    pub fn from_samples(samples: &[Vec<f64>]) -> Result<Self> {
        let width = samples.first().map(Vec::len).ok_or(NetworkError::EmptyDataset)?;
        let mut flat = Vec::with_capacity(samples.len() * width);
        for row in samples {
            ensure_len("batch sample", width, row.len())?;
            flat.extend_from_slice(row);
        }
        let matrix = Array2::from_shape_vec((samples.len(), width), flat)
            .map_err(|_| NetworkError::dimension("batch matrix", samples.len() * width, 0))?;

        let mean: Array1<f64> = matrix
            .mean_axis(Axis(0))
            .ok_or(NetworkError::EmptyDataset)?;
        let deviation = matrix.std_axis(Axis(0), 0.0);

        if deviation.iter().any(|&d| d == 0.0) {
            tracing::warn!("constant feature in batch, using unit deviation");
        }
        Self::new(mean.to_vec(), deviation.to_vec())
    }

    /// Z-scores `inputs` feature by feature.
    pub fn normalize(&self, inputs: &[f64]) -> Result<Vec<f64>> {
        ensure_len("normalized inputs", self.mean.len(), inputs.len())?;
        Ok(inputs
            .iter()
            .zip(&self.mean)
            .zip(&self.deviation)
            .map(|((x, mean), deviation)| (x - mean) / deviation)
            .collect())
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn deviation(&self) -> &[f64] {
        &self.deviation
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }
}

fn guard_deviation(deviation: f64) -> f64 {
    if deviation == 0.0 || !deviation.is_finite() {
        1.0
    } else {
        deviation
    }
}

/// Exponential running estimate of batch statistics, used at inference time.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStatistics {
    estimate: BatchStatistics,
    momentum: f64,
}

impl RunningStatistics {
    /// Starts the estimate from the first observed batch.
    pub fn new(initial: BatchStatistics, momentum: f64) -> Self {
        Self {
            estimate: initial,
            momentum,
        }
    }

    /// Folds a batch in: `m = momentum * m + (1 - momentum) * batch`.
    ///
    /// Means are blended directly, deviations through their variances.
    pub fn update(&mut self, batch: &BatchStatistics) -> Result<()> {
        ensure_len("running statistics", self.estimate.len(), batch.len())?;
        let keep = self.momentum;
        let take = 1.0 - self.momentum;
        for (running, observed) in self.estimate.mean.iter_mut().zip(&batch.mean) {
            *running = keep * *running + take * observed;
        }
        for (running, observed) in self.estimate.deviation.iter_mut().zip(&batch.deviation) {
            let variance = keep * running.powi(2) + take * observed.powi(2);
            *running = guard_deviation(variance.sqrt());
        }
        Ok(())
    }

    pub fn statistics(&self) -> &BatchStatistics {
        &self.estimate
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }
}
