//! A single computational node of a fully connected layer.
//!
//! A [`Unit`] owns one weight vector of length `input_size + 1`. Index 0 is
//! the bias weight, applied against an implicit constant input of 1. The
//! remaining fields (`u`, output, error, gradient) are scratch state that is
//! only meaningful between a forward call and the matching backward call.

use crate::activations::ActivationFunction;
use crate::error::{ensure_len, NetworkError, Result};
use crate::loss::LossFunction;
use rand::Rng;
use std::sync::Arc;

/// Half-width of the uniform range new weights are drawn from.
pub const DEFAULT_INIT_RANGE: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct Unit {
    weights: Vec<f64>,
    learning_rate: f64,
    activation: Arc<dyn ActivationFunction>,
    loss: Option<Arc<dyn LossFunction>>,
    u: f64,
    output: f64,
    error: f64,
    gradient: f64,
    accumulated_u: f64,
}

impl Unit {
    /// Creates a unit with weights drawn independently from `[-init_range, init_range]`.
    ///
    /// # Arguments
    ///
    /// * `input_size` - Number of inputs, excluding the bias channel
    /// * `activation` - Handle shared with the rest of the layer
    /// * `learning_rate` - Step size for [`Unit::update_weights`]
    /// * `loss` - Present only for output-layer units
    /// * `rng` - Source of the initial weights
    /// * `init_range` - Half-width of the initialisation range
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        activation: Arc<dyn ActivationFunction>,
        learning_rate: f64,
        loss: Option<Arc<dyn LossFunction>>,
        rng: &mut R,
        init_range: f64,
    ) -> Self {
        let range = init_range.abs();
        let weights = (0..=input_size)
            .map(|_| rng.random_range(-range..=range))
            .collect();
        Self::with_weights(weights, activation, learning_rate, loss)
    }

    /// Creates a unit with a fixed weight vector (bias at index 0).
    pub fn with_weights(
        weights: Vec<f64>,
        activation: Arc<dyn ActivationFunction>,
        learning_rate: f64,
        loss: Option<Arc<dyn LossFunction>>,
    ) -> Self {
        Self {
            weights,
            learning_rate,
            activation,
            loss,
            u: 0.0,
            output: 0.0,
            error: 0.0,
            gradient: 0.0,
            accumulated_u: 0.0,
        }
    }

    fn weighted_sum(&self, inputs: &[f64]) -> Result<f64> {
        ensure_len("unit inputs", self.input_size(), inputs.len())?;
        let (bias, weights) = match self.weights.split_first() {
            Some((bias, weights)) => (*bias, weights),
            None => return Err(NetworkError::dimension("unit weights", 1, 0)),
        };
        Ok(bias + weights.iter().zip(inputs).map(|(w, x)| w * x).sum::<f64>())
    }

    /// Computes the unit's output and adds `u` to the batch accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::DimensionMismatch`] unless
    /// `inputs.len() == weights.len() - 1`. The unit is left untouched.
    pub fn forward(&mut self, inputs: &[f64]) -> Result<f64> {
        let u = self.weighted_sum(inputs)?;
        self.u = u;
        self.output = self.activation.value(u);
        self.accumulated_u += u;
        Ok(self.output)
    }

    /// Same arithmetic as [`Unit::forward`] without touching any state.
    pub fn evaluate(&self, inputs: &[f64]) -> Result<f64> {
        Ok(self.activation.value(self.weighted_sum(inputs)?))
    }

    /// Replaces `u` with the batch-mean pre-activation when a batch size is given.
    fn apply_batch_mean(&mut self, batch_size: Option<usize>) -> Result<()> {
        match batch_size {
            Some(0) => Err(NetworkError::ZeroBatchSize),
            Some(n) => {
                self.u = self.accumulated_u / n as f64;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Computes the output error and ∂L/∂u for an output-layer unit.
    ///
    /// With `batch_size`, `u` is first overwritten with `accumulated_u / batch_size`
    /// so the activation derivative is taken at the batch-mean pre-activation.
    ///
    /// # Returns
    ///
    /// The error `loss(predicted, correct)`.
    pub fn compute_output_error(
        &mut self,
        correct: f64,
        predicted: f64,
        batch_size: Option<usize>,
    ) -> Result<f64> {
        let loss = self.loss.clone().ok_or(NetworkError::MissingLossFunction)?;
        self.apply_batch_mean(batch_size)?;
        self.error = loss.value(predicted, correct);
        self.gradient = self.activation.derivative(self.u) * loss.derivative(predicted, correct);
        Ok(self.error)
    }

    /// Computes ∂L/∂u for a hidden unit from the summed signal of the next layer.
    pub fn compute_hidden_gradient(
        &mut self,
        upstream_partial: f64,
        batch_size: Option<usize>,
    ) -> Result<f64> {
        self.apply_batch_mean(batch_size)?;
        self.gradient = self.activation.derivative(self.u) * upstream_partial;
        Ok(self.gradient)
    }

    /// Gradient-descent step `w[i] -= lr * gradient * received_inputs[i]`.
    ///
    /// `received_inputs` must include the bias channel at index 0, so its length
    /// equals the weight count. The accumulated `u` is reset afterwards.
    pub fn update_weights(&mut self, received_inputs: &[f64]) -> Result<()> {
        ensure_len("received inputs", self.weights.len(), received_inputs.len())?;
        match received_inputs.first() {
            Some(&bias) if bias == 1.0 => {}
            Some(&other) => return Err(NetworkError::MissingBiasChannel(other)),
            None => return Err(NetworkError::dimension("received inputs", 1, 0)),
        }
        let step = self.learning_rate * self.gradient;
        for (weight, input) in self.weights.iter_mut().zip(received_inputs) {
            *weight -= step * input;
        }
        self.accumulated_u = 0.0;
        Ok(())
    }

    /// Contribution `weights[index] * gradient` routed back to input `index`.
    ///
    /// `index` addresses the weight vector, so input `j` of the layer is `j + 1`.
    pub fn backprop_signal(&self, index: usize) -> Result<f64> {
        self.weights
            .get(index)
            .map(|weight| weight * self.gradient)
            .ok_or_else(|| NetworkError::dimension("backprop index", self.weights.len(), index))
    }

    /// Clears the batch accumulator without updating weights.
    pub fn reset_accumulator(&mut self) {
        self.accumulated_u = 0.0;
    }

    /// Number of inputs, excluding the bias channel.
    pub fn input_size(&self) -> usize {
        self.weights.len().saturating_sub(1)
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Overwrites the weight values. The length never changes.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        ensure_len("unit weights", self.weights.len(), weights.len())?;
        self.weights.copy_from_slice(weights);
        Ok(())
    }

    pub fn bias(&self) -> f64 {
        self.weights.first().copied().unwrap_or_default()
    }

    pub fn u(&self) -> f64 {
        self.u
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn gradient(&self) -> f64 {
        self.gradient
    }

    pub(crate) fn set_gradient(&mut self, gradient: f64) {
        self.gradient = gradient;
    }

    pub fn accumulated_u(&self) -> f64 {
        self.accumulated_u
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    pub fn activation(&self) -> &Arc<dyn ActivationFunction> {
        &self.activation
    }

    pub(crate) fn set_activation(&mut self, activation: Arc<dyn ActivationFunction>) {
        self.activation = activation;
    }

    pub(crate) fn set_loss(&mut self, loss: Option<Arc<dyn LossFunction>>) {
        self.loss = loss;
    }

    pub fn loss(&self) -> Option<&Arc<dyn LossFunction>> {
        self.loss.as_ref()
    }
}
