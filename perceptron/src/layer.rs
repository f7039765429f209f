use crate::activations::{ActivationFunction, ActivationType};
use crate::error::{ensure_len, NetworkError, Result};
use crate::loss::LossFunction;
use crate::statistics::BatchStatistics;
use crate::unit::Unit;
use rand::Rng;
use rayon::prelude::*;
use std::sync::Arc;

/// Layers with at least this many units evaluate them on the rayon pool.
pub const PARALLEL_THRESHOLD: usize = 64;

/// An ordered group of units sharing one activation function and input size.
///
/// Besides the units, a layer carries:
/// - the last output vector, prefixed with the bias channel 1.0
/// - the received-input cache (normalized inputs under batch norm)
/// - a running sum of unit outputs, slot 0 fixed at 1.0
/// - the batch-norm affine parameters `scale` (α) and `shift` (β)
///
/// Per training step a layer moves through
/// `idle → forward-computed → error/gradient-computed → weights-updated → idle`.
/// Backward methods called before any forward call work on stale scratch state.
#[derive(Debug, Clone)]
pub struct Layer {
    units: Vec<Unit>,
    input_size: usize,
    activation: Arc<dyn ActivationFunction>,
    learning_rate: f64,
    outputs: Vec<f64>,
    received_input: Vec<f64>,
    transformed_input: Vec<f64>,
    accumulator: Vec<f64>,
    scale: f64,
    shift: f64,
}

impl Layer {
    /// Creates a layer of `unit_count` randomly initialised units.
    ///
    /// # Arguments
    ///
    /// * `input_size` - Inputs per unit, excluding the bias channel
    /// * `unit_count` - Number of units
    /// * `activation` - Activation shared by every unit
    /// * `learning_rate` - Initial learning rate of every unit
    /// * `loss` - Loss function, given only for the output layer
    /// * `rng` - Source of the initial weights
    /// * `init_range` - Weights are drawn from `[-init_range, init_range]`
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidTopology`] for zero inputs or zero units.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        unit_count: usize,
        activation: ActivationType,
        learning_rate: f64,
        loss: Option<Arc<dyn LossFunction>>,
        rng: &mut R,
        init_range: f64,
    ) -> Result<Self> {
        if input_size == 0 || unit_count == 0 {
            return Err(NetworkError::InvalidTopology(format!(
                "layer needs at least one input and one unit, got {input_size} inputs and {unit_count} units"
            )));
        }
        let activation = activation.create();
        let units = (0..unit_count)
            .map(|_| {
                Unit::new(
                    input_size,
                    Arc::clone(&activation),
                    learning_rate,
                    loss.clone(),
                    &mut *rng,
                    init_range,
                )
            })
            .collect();
        Ok(Self::assemble(units, input_size, activation, learning_rate))
    }

    /// Creates a layer with pinned weights, one vector per unit, bias first.
    pub fn from_weights(
        weights: Vec<Vec<f64>>,
        activation: ActivationType,
        learning_rate: f64,
        loss: Option<Arc<dyn LossFunction>>,
    ) -> Result<Self> {
        let width = weights.first().map(Vec::len).unwrap_or_default();
        if width < 2 {
            return Err(NetworkError::InvalidTopology(
                "layer needs at least one unit with one input".to_string(),
            ));
        }
        for row in &weights {
            ensure_len("unit weights", width, row.len())?;
        }
        let activation = activation.create();
        let units = weights
            .into_iter()
            .map(|row| Unit::with_weights(row, Arc::clone(&activation), learning_rate, loss.clone()))
            .collect();
        Ok(Self::assemble(units, width - 1, activation, learning_rate))
    }

    fn assemble(
        units: Vec<Unit>,
        input_size: usize,
        activation: Arc<dyn ActivationFunction>,
        learning_rate: f64,
    ) -> Self {
        let slots = units.len() + 1;
        let mut layer = Self {
            units,
            input_size,
            activation,
            learning_rate,
            outputs: vec![0.0; slots],
            received_input: vec![0.0; input_size],
            transformed_input: vec![0.0; input_size],
            accumulator: vec![0.0; slots],
            scale: 1.0,
            shift: 0.0,
        };
        layer.reset_accumulator();
        if let Some(bias) = layer.outputs.first_mut() {
            *bias = 1.0;
        }
        layer
    }

    /// Returns `(cache, consumed)`: the vector stored as received input and
    /// the vector the units actually see.
    fn prepare_inputs(
        &self,
        inputs: &[f64],
        statistics: Option<&BatchStatistics>,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        ensure_len("layer inputs", self.input_size, inputs.len())?;
        match statistics {
            Some(statistics) => {
                let normalized = statistics.normalize(inputs)?;
                let transformed = normalized
                    .iter()
                    .map(|x| self.scale * x + self.shift)
                    .collect();
                Ok((normalized, transformed))
            }
            None => Ok((inputs.to_vec(), inputs.to_vec())),
        }
    }

    /// Runs every unit forward and returns `[1.0, out_1, ..., out_N]`.
    ///
    /// With `statistics`, the inputs are z-scored first, the normalized vector
    /// is cached as the received input and the units consume `α·x̂ + β`.
    /// Each unit output is added to the running accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::DimensionMismatch`] if `inputs` or `statistics`
    /// do not match the layer's input size. Nothing is mutated in that case.
    pub fn forward(
        &mut self,
        inputs: &[f64],
        statistics: Option<&BatchStatistics>,
    ) -> Result<Vec<f64>> {
        let (received, transformed) = self.prepare_inputs(inputs, statistics)?;

        let unit_outputs: Vec<f64> = if self.units.len() >= PARALLEL_THRESHOLD {
            self.units
                .par_iter_mut()
                .map(|unit| unit.forward(&transformed))
                .collect::<Result<_>>()?
        } else {
            self.units
                .iter_mut()
                .map(|unit| unit.forward(&transformed))
                .collect::<Result<_>>()?
        };

        // accumulator writes stay outside the parallel section
        self.outputs.clear();
        self.outputs.push(1.0);
        self.outputs.extend_from_slice(&unit_outputs);
        for (slot, output) in self.accumulator.iter_mut().skip(1).zip(&unit_outputs) {
            *slot += output;
        }
        self.received_input = received;
        self.transformed_input = transformed;
        Ok(self.outputs.clone())
    }

    /// Unit outputs for `inputs` without the bias slot and without touching state.
    pub fn evaluate(&self, inputs: &[f64], statistics: Option<&BatchStatistics>) -> Result<Vec<f64>> {
        let (_, transformed) = self.prepare_inputs(inputs, statistics)?;
        if self.units.len() >= PARALLEL_THRESHOLD {
            self.units
                .par_iter()
                .map(|unit| unit.evaluate(&transformed))
                .collect()
        } else {
            self.units
                .iter()
                .map(|unit| unit.evaluate(&transformed))
                .collect()
        }
    }

    /// `[1.0]` followed by the vector the units consumed on the last forward call.
    pub fn weight_update_inputs(&self) -> Vec<f64> {
        let mut inputs = Vec::with_capacity(self.input_size + 1);
        inputs.push(1.0);
        inputs.extend_from_slice(&self.transformed_input);
        inputs
    }

    fn check_update_inputs(&self, inputs: &[f64], batch_size: Option<usize>) -> Result<()> {
        ensure_len("layer update inputs", self.input_size + 1, inputs.len())?;
        match inputs.first() {
            Some(&bias) if bias == 1.0 => {}
            Some(&other) => return Err(NetworkError::MissingBiasChannel(other)),
            None => return Err(NetworkError::dimension("layer update inputs", 1, 0)),
        }
        if batch_size == Some(0) {
            return Err(NetworkError::ZeroBatchSize);
        }
        Ok(())
    }

    /// Backward step for the output layer.
    ///
    /// Computes every unit's error and gradient, takes the α/β step when
    /// `batch_norm` is set, then updates all weights from `inputs` (bias
    /// channel first) and resets the accumulator. The affine step always runs
    /// before any weight changes.
    ///
    /// # Returns
    ///
    /// The per-unit errors.
    pub fn update_as_output_layer(
        &mut self,
        correct: &[f64],
        predicted: &[f64],
        inputs: &[f64],
        batch_size: Option<usize>,
        batch_norm: bool,
    ) -> Result<Vec<f64>> {
        ensure_len("correct values", self.units.len(), correct.len())?;
        ensure_len("predicted values", self.units.len(), predicted.len())?;
        self.check_update_inputs(inputs, batch_size)?;
        if self.units.iter().any(|unit| unit.loss().is_none()) {
            return Err(NetworkError::MissingLossFunction);
        }

        let errors = self
            .units
            .iter_mut()
            .zip(correct.iter().zip(predicted))
            .map(|(unit, (&c, &p))| unit.compute_output_error(c, p, batch_size))
            .collect::<Result<Vec<_>>>()?;
        self.finish_update(inputs, batch_norm)?;
        Ok(errors)
    }

    /// Backward step for a hidden layer, `upstream` being the successor's
    /// [`Layer::backprop_signals`].
    pub fn update_as_hidden_layer(
        &mut self,
        upstream: &[f64],
        inputs: &[f64],
        batch_size: Option<usize>,
        batch_norm: bool,
    ) -> Result<()> {
        ensure_len("upstream gradients", self.units.len(), upstream.len())?;
        self.check_update_inputs(inputs, batch_size)?;

        for (unit, &partial) in self.units.iter_mut().zip(upstream) {
            unit.compute_hidden_gradient(partial, batch_size)?;
        }
        self.finish_update(inputs, batch_norm)
    }

    /// Backward step for the output layer of a batch.
    ///
    /// Each unit takes its entry of `gradients` (the batch mean of the
    /// per-sample ∂L/∂u from [`Layer::accumulate_batch_gradient`]) as is,
    /// then the update proceeds as in [`Layer::update_as_output_layer`].
    pub fn apply_batch_gradients(&mut self, gradients: &[f64], inputs: &[f64], batch_norm: bool) -> Result<()> {
        ensure_len("batch gradients", self.units.len(), gradients.len())?;
        self.check_update_inputs(inputs, None)?;
        for (unit, &gradient) in self.units.iter_mut().zip(gradients) {
            unit.set_gradient(gradient);
        }
        self.finish_update(inputs, batch_norm)
    }

    fn finish_update(&mut self, inputs: &[f64], batch_norm: bool) -> Result<()> {
        if batch_norm {
            self.update_affine_params()?;
        }
        if self.units.len() >= PARALLEL_THRESHOLD {
            self.units
                .par_iter_mut()
                .try_for_each(|unit| unit.update_weights(inputs))?;
        } else {
            for unit in &mut self.units {
                unit.update_weights(inputs)?;
            }
        }
        self.reset_accumulator();
        Ok(())
    }

    /// ∂L/∂input for every input of this layer.
    ///
    /// Entry `j` sums `backprop_signal(j + 1)` over all units; weight index 0
    /// is the bias and routes nothing backward.
    pub fn backprop_signals(&self) -> Result<Vec<f64>> {
        let mut signals = vec![0.0; self.input_size];
        for (j, signal) in signals.iter_mut().enumerate() {
            for unit in &self.units {
                *signal += unit.backprop_signal(j + 1)?;
            }
        }
        Ok(signals)
    }

    /// Computes every unit's output error without updating weights.
    ///
    /// # Returns
    ///
    /// The per-unit gradients ∂L/∂u.
    pub fn accumulate_batch_gradient(&mut self, correct: &[f64], predicted: &[f64]) -> Result<Vec<f64>> {
        ensure_len("correct values", self.units.len(), correct.len())?;
        ensure_len("predicted values", self.units.len(), predicted.len())?;
        if self.units.iter().any(|unit| unit.loss().is_none()) {
            return Err(NetworkError::MissingLossFunction);
        }
        self.units
            .iter_mut()
            .zip(correct.iter().zip(predicted))
            .map(|(unit, (&c, &p))| {
                unit.compute_output_error(c, p, None)?;
                Ok(unit.gradient())
            })
            .collect()
    }

    /// Gradient step on the affine parameters:
    /// `α -= lr · Σ_j s_j · x̂_j` and `β -= lr · Σ_j s_j`,
    /// where `s` are this layer's backprop signals and `x̂` the received-input cache.
    ///
    /// After a batch the cache holds the last forwarded sample's normalized
    /// input. The batch mean of `x̂` under the batch's own statistics is zero,
    /// so it would never move `α`.
    pub fn update_affine_params(&mut self) -> Result<()> {
        let signals = self.backprop_signals()?;
        let scale_gradient: f64 = signals
            .iter()
            .zip(&self.received_input)
            .map(|(s, x)| s * x)
            .sum();
        let shift_gradient: f64 = signals.iter().sum();
        self.scale -= self.learning_rate * scale_gradient;
        self.shift -= self.learning_rate * shift_gradient;
        Ok(())
    }

    /// Batch-mean output vector (bias slot 1.0 kept), then resets the accumulator.
    pub fn mean_accumulated_output(&mut self, batch_size: usize) -> Result<Vec<f64>> {
        if batch_size == 0 {
            return Err(NetworkError::ZeroBatchSize);
        }
        let n = batch_size as f64;
        let mut mean: Vec<f64> = self.accumulator.iter().map(|sum| sum / n).collect();
        if let Some(bias) = mean.first_mut() {
            *bias = 1.0;
        }
        self.reset_accumulator();
        Ok(mean)
    }

    /// Zeroes the output accumulator, slot 0 back to 1.0.
    ///
    /// Units keep their accumulated `u` until their next weight update so that
    /// a batch-mean prediction can be read before the backward step.
    pub fn reset_accumulator(&mut self) {
        self.accumulator.fill(0.0);
        if let Some(bias) = self.accumulator.first_mut() {
            *bias = 1.0;
        }
    }

    /// Drops all batch state: the output accumulator and every unit's accumulated `u`.
    pub fn clear_batch_state(&mut self) {
        self.reset_accumulator();
        for unit in &mut self.units {
            unit.reset_accumulator();
        }
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Last output vector, bias slot included.
    pub fn outputs(&self) -> &[f64] {
        &self.outputs
    }

    pub fn received_input(&self) -> &[f64] {
        &self.received_input
    }

    pub fn accumulator(&self) -> &[f64] {
        &self.accumulator
    }

    pub fn errors(&self) -> Vec<f64> {
        self.units.iter().map(Unit::error).collect()
    }

    pub fn gradients(&self) -> Vec<f64> {
        self.units.iter().map(Unit::gradient).collect()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn shift(&self) -> f64 {
        self.shift
    }

    pub fn set_affine_params(&mut self, scale: f64, shift: f64) {
        self.scale = scale;
        self.shift = shift;
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Sets the learning rate of the layer and of every unit in it.
    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
        for unit in &mut self.units {
            unit.set_learning_rate(learning_rate);
        }
    }

    pub fn activation(&self) -> &Arc<dyn ActivationFunction> {
        &self.activation
    }

    pub fn activation_type(&self) -> ActivationType {
        self.activation.activation_type()
    }

    /// Attaches `loss` to every unit, or detaches it with `None`.
    pub(crate) fn set_loss(&mut self, loss: Option<Arc<dyn LossFunction>>) {
        for unit in &mut self.units {
            unit.set_loss(loss.clone());
        }
    }

    /// Swaps the shared activation for every unit of the layer.
    pub fn set_activation(&mut self, activation: ActivationType) {
        self.activation = activation.create();
        for unit in &mut self.units {
            unit.set_activation(Arc::clone(&self.activation));
        }
    }

    /// Overwrites every unit's weight vector.
    ///
    /// All rows are checked before the first one is written.
    pub fn set_weights(&mut self, weights: &[Vec<f64>]) -> Result<()> {
        ensure_len("layer units", self.units.len(), weights.len())?;
        for row in weights {
            ensure_len("unit weights", self.input_size + 1, row.len())?;
        }
        for (unit, row) in self.units.iter_mut().zip(weights) {
            unit.set_weights(row)?;
        }
        Ok(())
    }
}
