use crate::activations::ActivationType;
use crate::error::{NetworkError, Result};
use crate::loss::LossType;
use crate::statistics::DEFAULT_MOMENTUM;
use crate::unit::DEFAULT_INIT_RANGE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One fully connected layer of the topology.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LayerConfig {
    /// Number of units in the layer
    pub units: usize,
    /// Activation shared by every unit of the layer
    pub activation: ActivationType,
    /// Overrides the network-wide learning rate for this layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
}

impl LayerConfig {
    pub fn new(units: usize, activation: ActivationType) -> Self {
        Self {
            units,
            activation,
            learning_rate: None,
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = Some(learning_rate);
        self
    }
}

/// Configuration for a feed-forward network.
///
/// This record replaces a step-by-step builder: it holds the topology, the
/// per-layer activations, the output loss and the training hyperparameters,
/// and is consumed by [`Network::new`](crate::Network::new) together with the
/// label encoder and learning-rate schedule.
///
/// # Example
///
/// ```
/// use perceptron::NetworkConfig;
///
/// let config = NetworkConfig::default();
/// assert_eq!(config.layer_sizes(), vec![784, 100, 10]);
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Number of network inputs
    pub input_size: usize,

    /// Layers in forward order. The last one is the output layer.
    pub layers: Vec<LayerConfig>,

    /// Loss attached to the output layer
    pub loss: LossType,

    /// Default learning rate for layers without their own.
    pub learning_rate: f64,

    /// Upper bound on training epochs.
    pub max_epochs: usize,

    /// Training stops once the per-epoch accuracy reaches this value.
    #[serde(default)]
    pub acceptable_accuracy: Option<f64>,

    /// Initial weights are drawn uniformly from `[-init_range, init_range]`.
    #[serde(default = "default_init_range")]
    pub init_range: f64,

    /// Seed for weight initialisation and sample shuffling.
    /// Without it the network seeds itself from the operating system.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Momentum of the running normalization statistics used at inference
    /// after batch-normalized training.
    #[serde(default = "default_momentum")]
    pub normalization_momentum: f64,
}

fn default_init_range() -> f64 {
    DEFAULT_INIT_RANGE
}

fn default_momentum() -> f64 {
    DEFAULT_MOMENTUM
}

impl NetworkConfig {
    /// Creates a configuration with default initialisation settings.
    ///
    /// # Arguments
    ///
    /// * `input_size` - Number of network inputs
    /// * `layers` - Layer descriptions in forward order
    /// * `loss` - Loss attached to the output layer
    /// * `learning_rate` - Default learning rate
    /// * `max_epochs` - Upper bound on training epochs
    pub fn new(
        input_size: usize,
        layers: Vec<LayerConfig>,
        loss: LossType,
        learning_rate: f64,
        max_epochs: usize,
    ) -> Self {
        Self {
            input_size,
            layers,
            loss,
            learning_rate,
            max_epochs,
            acceptable_accuracy: None,
            init_range: DEFAULT_INIT_RANGE,
            seed: None,
            normalization_momentum: DEFAULT_MOMENTUM,
        }
    }

    /// Loads a network configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the parsed
    /// configuration fails [`NetworkConfig::validate`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// use perceptron::NetworkConfig;
    /// use std::path::Path;
    ///
    /// let config = NetworkConfig::load(Path::new("config.json")).unwrap();
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: NetworkConfig = serde_json::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// `[input_size, units_1, ..., units_n]`
    pub fn layer_sizes(&self) -> Vec<usize> {
        std::iter::once(self.input_size)
            .chain(self.layers.iter().map(|layer| layer.units))
            .collect()
    }

    /// Learning rate of layer `index`, falling back to the network-wide rate.
    pub fn layer_learning_rate(&self, index: usize) -> f64 {
        self.layers
            .get(index)
            .and_then(|layer| layer.learning_rate)
            .unwrap_or(self.learning_rate)
    }

    /// Checks the topology and hyperparameters.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidTopology`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(NetworkError::InvalidTopology(reason));
        if self.input_size == 0 {
            return invalid("input size must be positive".to_string());
        }
        if self.layers.is_empty() {
            return invalid("at least one layer is required".to_string());
        }
        if let Some(index) = self.layers.iter().position(|layer| layer.units == 0) {
            return invalid(format!("layer {index} has no units"));
        }
        for index in 0..self.layers.len() {
            let rate = self.layer_learning_rate(index);
            if !rate.is_finite() || rate <= 0.0 {
                return invalid(format!("layer {index} has invalid learning rate {rate}"));
            }
        }
        if !self.init_range.is_finite() || self.init_range < 0.0 {
            return invalid(format!("invalid init range {}", self.init_range));
        }
        if !(0.0..1.0).contains(&self.normalization_momentum) {
            return invalid(format!(
                "normalization momentum {} outside [0, 1)",
                self.normalization_momentum
            ));
        }
        if self.acceptable_accuracy.is_some_and(|accuracy| !accuracy.is_finite()) {
            return invalid("acceptable accuracy must be finite".to_string());
        }
        Ok(())
    }
}

/// Default configuration for a 28x28 digit classifier:
/// 784 inputs, 100 sigmoid hidden units, 10 sigmoid outputs,
/// cross-entropy loss, learning rate 0.01 and 20 epochs.
impl Default for NetworkConfig {
    fn default() -> Self {
        Self::new(
            784,
            vec![
                LayerConfig::new(100, ActivationType::Sigmoid),
                LayerConfig::new(10, ActivationType::Sigmoid),
            ],
            LossType::CrossEntropy,
            0.01,
            20,
        )
    }
}
