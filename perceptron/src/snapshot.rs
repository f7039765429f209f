//! Persisted weight snapshot.
//!
//! A snapshot is a JSON array with one document per layer:
//!
//! ```json
//! [{ "layer": {
//!     "inputSize": 2, "actFunc": "sigmoid", "learningRate": 0.01,
//!     "neurons": [{ "bias": 0.1, "weights": [0.1, 0.2, -0.3] }]
//! }}]
//! ```
//!
//! `weights` holds the full vector with the bias at index 0. A vector of
//! exactly `inputSize` entries is also accepted, in which case `bias`
//! supplies index 0. Layers trained with batch normalization carry an extra
//! `normalization` object with α, β and the running statistics.

use crate::activations::ActivationType;
use crate::error::{NetworkError, Result};
use crate::statistics::BatchStatistics;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronSnapshot {
    pub bias: f64,
    pub weights: Vec<f64>,
}

impl NeuronSnapshot {
    pub fn new(weights: Vec<f64>) -> Self {
        Self {
            bias: weights.first().copied().unwrap_or_default(),
            weights,
        }
    }

    /// Weight vector of length `input_size + 1`, bias first.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::DimensionMismatch`] unless `weights` holds
    /// `input_size + 1` or `input_size` entries.
    pub fn full_weights(&self, input_size: usize) -> Result<Vec<f64>> {
        if self.weights.len() == input_size + 1 {
            Ok(self.weights.clone())
        } else if self.weights.len() == input_size {
            let mut full = Vec::with_capacity(input_size + 1);
            full.push(self.bias);
            full.extend_from_slice(&self.weights);
            Ok(full)
        } else {
            Err(NetworkError::dimension(
                "snapshot neuron weights",
                input_size + 1,
                self.weights.len(),
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationSnapshot {
    pub scale: f64,
    pub shift: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<BatchStatistics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSnapshot {
    pub input_size: usize,
    pub act_func: String,
    pub learning_rate: f64,
    pub neurons: Vec<NeuronSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<NormalizationSnapshot>,
}

impl LayerSnapshot {
    /// Resolves `actFunc` through the activation registry.
    pub fn activation_type(&self) -> Result<ActivationType> {
        self.act_func.parse()
    }

    /// Every neuron's full weight vector, checked against `inputSize`.
    pub fn weight_rows(&self) -> Result<Vec<Vec<f64>>> {
        self.neurons
            .iter()
            .map(|neuron| neuron.full_weights(self.input_size))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LayerDocument {
    layer: LayerSnapshot,
}

/// Ordered per-layer documents of a network, input layer first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkSnapshot {
    documents: Vec<LayerDocument>,
}

impl NetworkSnapshot {
    pub fn new(layers: Vec<LayerSnapshot>) -> Self {
        Self {
            documents: layers
                .into_iter()
                .map(|layer| LayerDocument { layer })
                .collect(),
        }
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerSnapshot> {
        self.documents.iter().map(|document| &document.layer)
    }

    pub fn layer(&self, index: usize) -> Option<&LayerSnapshot> {
        self.documents.get(index).map(|document| &document.layer)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Writes the snapshot as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Reads a snapshot written by [`NetworkSnapshot::save`].
    ///
    /// Only the document shape is checked here; activation names and
    /// dimensions are resolved when the snapshot is applied to a network.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
