use crate::activations::ActivationType;
use crate::dataset::{EpochReport, Sample, TrainingMode, TrainingSummary};
use crate::error::{ensure_len, NetworkError, Result};
use crate::layer::Layer;
use crate::loss::{LossFunction, LossType};
use crate::network_config::NetworkConfig;
use crate::schedule::{LabelEncoder, LearningRateSchedule};
use crate::snapshot::{LayerSnapshot, NetworkSnapshot, NeuronSnapshot, NormalizationSnapshot};
use crate::statistics::{BatchStatistics, RunningStatistics, DEFAULT_MOMENTUM};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;

/// Inputs seen by every layer during one forward pass, plus the prediction.
struct ForwardTrace {
    /// Bias-prefixed vector each layer consumed, input layer first
    layer_inputs: Vec<Vec<f64>>,
    prediction: Vec<f64>,
}

/// How the output layer's gradients are obtained in a backward pass.
enum OutputStep<'a> {
    /// Computed from one target and prediction
    Sample { target: &'a [f64], prediction: &'a [f64] },
    /// Already averaged over a batch
    BatchMean { gradients: &'a [f64] },
}

/// A fully connected feed-forward network trained by backpropagation.
///
/// The network owns its layers, the loss attached to the output layer, the
/// injected label encoder and learning-rate schedule, and the running
/// normalization statistics collected during batch-normalized training.
///
/// # Examples
///
/// ```
/// use perceptron::{
///     ActivationType, LabelEncoder, LayerConfig, LearningRateSchedule, LossType, Network,
///     NetworkConfig, Sample, TrainingMode,
/// };
///
/// let mut config = NetworkConfig::new(
///     2,
///     vec![
///         LayerConfig::new(4, ActivationType::Tanh),
///         LayerConfig::new(1, ActivationType::Sigmoid),
///     ],
///     LossType::Mse,
///     0.5,
///     50,
/// );
/// config.seed = Some(1);
///
/// let encoder = LabelEncoder::new(|label| vec![label as f64]);
/// let mut network = Network::new(&config, encoder, LearningRateSchedule::constant()).unwrap();
///
/// let samples = vec![
///     Sample::new(vec![0.0, 0.0], 0),
///     Sample::new(vec![0.0, 1.0], 1),
///     Sample::new(vec![1.0, 0.0], 1),
///     Sample::new(vec![1.0, 1.0], 1),
/// ];
/// let summary = network
///     .train(&samples, TrainingMode::Online, |_, report| 1.0 - report.mean_loss)
///     .unwrap();
/// assert_eq!(summary.epochs_run, 50);
///
/// let prediction = network.classify(&[1.0, 0.0]).unwrap();
/// assert_eq!(prediction.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Layer>,
    loss: Arc<dyn LossFunction>,
    input_size: usize,
    max_epochs: usize,
    acceptable_accuracy: Option<f64>,
    label_encoder: LabelEncoder,
    schedule: LearningRateSchedule,
    normalization: Vec<Option<RunningStatistics>>,
    momentum: f64,
    rng: StdRng,
    epochs_completed: usize,
}

impl Network {
    /// Assembles a randomly initialised network from a configuration record.
    ///
    /// # Arguments
    ///
    /// * `config` - Topology, loss and hyperparameters
    /// * `label_encoder` - Maps label indices to target vectors
    /// * `schedule` - Learning-rate schedule consulted after every epoch
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or when the encoder's output
    /// length differs from the output layer's unit count.
    pub fn new(
        config: &NetworkConfig,
        label_encoder: LabelEncoder,
        schedule: LearningRateSchedule,
    ) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let loss = config.loss.create();
        let last = config.layers.len().saturating_sub(1);
        let mut input_size = config.input_size;
        let mut layers = Vec::with_capacity(config.layers.len());
        for (index, layer_config) in config.layers.iter().enumerate() {
            let layer_loss = (index == last).then(|| Arc::clone(&loss));
            layers.push(Layer::new(
                input_size,
                layer_config.units,
                layer_config.activation,
                config.layer_learning_rate(index),
                layer_loss,
                &mut rng,
                config.init_range,
            )?);
            input_size = layer_config.units;
        }

        let mut network = Self::assemble(layers, loss, label_encoder, schedule, rng)?;
        network.max_epochs = config.max_epochs;
        network.acceptable_accuracy = config.acceptable_accuracy;
        network.momentum = config.normalization_momentum;
        tracing::debug!(layers = ?config.layer_sizes(), loss = %config.loss, "network assembled");
        Ok(network)
    }

    /// Assembles a network from prepared layers, for example with pinned weights.
    ///
    /// `loss` is attached to the last layer. The network runs the default
    /// number of epochs and seeds its shuffling from the operating system
    /// unless changed with [`Network::with_max_epochs`] and [`Network::with_seed`].
    pub fn from_layers(
        layers: Vec<Layer>,
        loss: LossType,
        label_encoder: LabelEncoder,
        schedule: LearningRateSchedule,
    ) -> Result<Self> {
        let mut network = Self::assemble(
            layers,
            loss.create(),
            label_encoder,
            schedule,
            StdRng::from_rng(&mut rand::rng()),
        )?;
        network.max_epochs = NetworkConfig::default().max_epochs;
        Ok(network)
    }

    /// Rebuilds a network from a persisted snapshot.
    ///
    /// Topology, activations, learning rates, weights and any normalization
    /// state come from the snapshot. The loss, encoder and schedule are not
    /// persisted and must be supplied again.
    pub fn from_snapshot(
        snapshot: &NetworkSnapshot,
        loss: LossType,
        label_encoder: LabelEncoder,
        schedule: LearningRateSchedule,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(snapshot.len());
        let mut normalization = Vec::with_capacity(snapshot.len());
        for document in snapshot.layers() {
            let staged = StagedLayer::from_snapshot(document)?;
            let mut layer = Layer::from_weights(
                staged.weights,
                staged.activation,
                staged.learning_rate,
                None,
            )?;
            ensure_len("snapshot input size", document.input_size, layer.input_size())?;
            layer.set_affine_params(staged.scale, staged.shift);
            layers.push(layer);
            normalization.push(staged.running);
        }

        let mut network = Self::from_layers(layers, loss, label_encoder, schedule)?;
        network.normalization = normalization
            .into_iter()
            .map(|running| running.map(|statistics| RunningStatistics::new(statistics, DEFAULT_MOMENTUM)))
            .collect();
        Ok(network)
    }

    fn assemble(
        mut layers: Vec<Layer>,
        loss: Arc<dyn LossFunction>,
        label_encoder: LabelEncoder,
        schedule: LearningRateSchedule,
        rng: StdRng,
    ) -> Result<Self> {
        let input_size = layers
            .first()
            .map(Layer::input_size)
            .ok_or_else(|| NetworkError::InvalidTopology("network needs at least one layer".to_string()))?;
        for pair in layers.windows(2) {
            if let [previous, next] = pair {
                ensure_len("layer chain", previous.unit_count(), next.input_size())?;
            }
        }
        let output_size = layers.last().map(Layer::unit_count).unwrap_or_default();
        ensure_len("label encoder output", output_size, label_encoder.output_len())?;

        let last = layers.len() - 1;
        for (index, layer) in layers.iter_mut().enumerate() {
            layer.set_loss((index == last).then(|| Arc::clone(&loss)));
        }

        let normalization = vec![None; layers.len()];
        Ok(Self {
            layers,
            loss,
            input_size,
            max_epochs: 0,
            acceptable_accuracy: None,
            label_encoder,
            schedule,
            normalization,
            momentum: DEFAULT_MOMENTUM,
            rng,
            epochs_completed: 0,
        })
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_acceptable_accuracy(mut self, accuracy: f64) -> Self {
        self.acceptable_accuracy = Some(accuracy);
        self
    }

    /// Reseeds the generator used to shuffle samples every epoch.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Runs `input` through every layer and returns the raw prediction vector.
    ///
    /// No arg-max or normalization is applied to the outputs. The call does
    /// not touch any training state. After batch-normalized training each
    /// layer standardizes its input with the running statistics.
    pub fn classify(&self, input: &[f64]) -> Result<Vec<f64>> {
        ensure_len("network input", self.input_size, input.len())?;
        let mut current = input.to_vec();
        for (layer, running) in self.layers.iter().zip(&self.normalization) {
            current = layer.evaluate(&current, running.as_ref().map(RunningStatistics::statistics))?;
        }
        Ok(current)
    }

    /// Summed per-output loss of `sample` under the current weights.
    pub fn sample_loss(&self, sample: &Sample) -> Result<f64> {
        let target = self.encode(sample.label)?;
        let prediction = self.classify(&sample.input)?;
        Ok(self.total_loss(&prediction, &target))
    }

    fn total_loss(&self, prediction: &[f64], target: &[f64]) -> f64 {
        prediction
            .iter()
            .zip(target)
            .map(|(&p, &c)| self.loss.value(p, c))
            .sum()
    }

    fn encode(&self, label: usize) -> Result<Vec<f64>> {
        let target = self.label_encoder.encode(label);
        ensure_len("encoded label", self.output_size(), target.len())?;
        Ok(target)
    }

    fn forward_pass(
        &mut self,
        input: &[f64],
        statistics: Option<&[BatchStatistics]>,
    ) -> Result<ForwardTrace> {
        ensure_len("network input", self.input_size, input.len())?;
        let mut layer_inputs = Vec::with_capacity(self.layers.len());
        let mut current = input.to_vec();
        for (index, layer) in self.layers.iter_mut().enumerate() {
            let layer_statistics = statistics.and_then(|all| all.get(index));
            let outputs = layer.forward(&current, layer_statistics)?;
            layer_inputs.push(layer.weight_update_inputs());
            current = outputs.get(1..).map(<[f64]>::to_vec).unwrap_or_default();
        }
        Ok(ForwardTrace {
            layer_inputs,
            prediction: current,
        })
    }

    /// Output layer first, then each hidden layer consumes the backprop
    /// signals of its successor.
    fn backward(
        &mut self,
        output_step: OutputStep<'_>,
        layer_inputs: &[Vec<f64>],
        batch_size: Option<usize>,
        batch_norm: bool,
    ) -> Result<()> {
        ensure_len("layer inputs", self.layers.len(), layer_inputs.len())?;
        let (output_layer, hidden_layers) = self
            .layers
            .split_last_mut()
            .ok_or_else(|| NetworkError::InvalidTopology("network has no layers".to_string()))?;
        let (output_inputs, hidden_inputs) = layer_inputs
            .split_last()
            .ok_or_else(|| NetworkError::dimension("layer inputs", 1, 0))?;

        match output_step {
            OutputStep::Sample { target, prediction } => {
                output_layer.update_as_output_layer(
                    target,
                    prediction,
                    output_inputs,
                    batch_size,
                    batch_norm,
                )?;
            }
            OutputStep::BatchMean { gradients } => {
                output_layer.apply_batch_gradients(gradients, output_inputs, batch_norm)?;
            }
        }
        let mut upstream = output_layer.backprop_signals()?;
        for (layer, inputs) in hidden_layers.iter_mut().zip(hidden_inputs).rev() {
            layer.update_as_hidden_layer(&upstream, inputs, batch_size, batch_norm)?;
            upstream = layer.backprop_signals()?;
        }
        Ok(())
    }

    /// One online step: forward, backward and weight update for a single sample.
    ///
    /// # Returns
    ///
    /// The sample's summed per-output loss before the update.
    pub fn train_sample(&mut self, sample: &Sample) -> Result<f64> {
        let target = self.encode(sample.label)?;
        let trace = self.forward_pass(&sample.input, None)?;
        let loss = self.total_loss(&trace.prediction, &target);
        let output_step = OutputStep::Sample {
            target: &target,
            prediction: &trace.prediction,
        };
        self.backward(output_step, &trace.layer_inputs, None, false)?;
        Ok(loss)
    }

    /// Per-layer statistics of the batch, computed without touching any state.
    ///
    /// Layer `k` is standardized with the statistics of what layer `k - 1`
    /// produces for this batch after its own standardization.
    fn batch_statistics(&self, batch: &[&Sample]) -> Result<Vec<BatchStatistics>> {
        let mut activations = Vec::with_capacity(batch.len());
        for sample in batch {
            ensure_len("network input", self.input_size, sample.input.len())?;
            activations.push(sample.input.clone());
        }
        let mut statistics = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let layer_statistics = BatchStatistics::from_samples(&activations)?;
            activations = activations
                .iter()
                .map(|input| layer.evaluate(input, Some(&layer_statistics)))
                .collect::<Result<_>>()?;
            statistics.push(layer_statistics);
        }
        Ok(statistics)
    }

    /// One deferred update for a whole batch.
    ///
    /// Every sample runs forward and through
    /// [`Layer::accumulate_batch_gradient`] on the output layer. The single
    /// backward step then applies the mean of those per-sample gradients to
    /// the output units, with the batch-mean inputs of every layer and the
    /// batch-mean pre-activations of every hidden unit.
    ///
    /// # Errors
    ///
    /// Every sample is checked before the first forward pass, so a rejected
    /// batch leaves the network untouched.
    ///
    /// # Returns
    ///
    /// The summed per-sample loss over the batch.
    pub fn train_batch(&mut self, batch: &[&Sample], batch_norm: bool) -> Result<f64> {
        if batch.is_empty() {
            return Err(NetworkError::EmptyDataset);
        }
        for sample in batch {
            ensure_len("network input", self.input_size, sample.input.len())?;
        }
        let targets = batch
            .iter()
            .map(|sample| self.encode(sample.label))
            .collect::<Result<Vec<_>>>()?;
        let statistics = if batch_norm {
            Some(self.batch_statistics(batch)?)
        } else {
            None
        };

        let result = self.run_batch(batch, &targets, statistics.as_deref(), batch_norm);
        if result.is_err() {
            for layer in &mut self.layers {
                layer.clear_batch_state();
            }
        }
        let total_loss = result?;

        if let Some(statistics) = statistics {
            self.fold_running_statistics(statistics)?;
        }
        Ok(total_loss)
    }

    fn run_batch(
        &mut self,
        batch: &[&Sample],
        targets: &[Vec<f64>],
        statistics: Option<&[BatchStatistics]>,
        batch_norm: bool,
    ) -> Result<f64> {
        let batch_size = batch.len();
        let mut gradient_sum = vec![0.0; self.output_size()];
        let mut input_sums: Vec<Vec<f64>> = self
            .layers
            .iter()
            .map(|layer| vec![0.0; layer.input_size() + 1])
            .collect();
        let mut total_loss = 0.0;

        for (sample, target) in batch.iter().zip(targets) {
            let trace = self.forward_pass(&sample.input, statistics)?;
            total_loss += self.total_loss(&trace.prediction, target);

            let output_layer = self
                .layers
                .last_mut()
                .ok_or_else(|| NetworkError::InvalidTopology("network has no layers".to_string()))?;
            let gradients = output_layer.accumulate_batch_gradient(target, &trace.prediction)?;

            add_into(&mut gradient_sum, &gradients);
            for (sum, inputs) in input_sums.iter_mut().zip(&trace.layer_inputs) {
                add_into(sum, inputs);
            }
        }

        let n = batch_size as f64;
        let mean_gradients: Vec<f64> = gradient_sum.iter().map(|sum| sum / n).collect();
        let mean_inputs: Vec<Vec<f64>> = input_sums
            .into_iter()
            .map(|sums| {
                let mut mean: Vec<f64> = sums.iter().map(|sum| sum / n).collect();
                if let Some(bias) = mean.first_mut() {
                    *bias = 1.0;
                }
                mean
            })
            .collect();
        let mean_prediction = match self.layers.last_mut() {
            Some(output_layer) => output_layer.mean_accumulated_output(batch_size)?,
            None => return Err(NetworkError::InvalidTopology("network has no layers".to_string())),
        };

        tracing::debug!(
            batch_size,
            batch_norm,
            mean_prediction = ?mean_prediction.get(1..).unwrap_or_default(),
            mean_gradient = ?mean_gradients,
            "applying batch update"
        );
        let output_step = OutputStep::BatchMean {
            gradients: &mean_gradients,
        };
        self.backward(output_step, &mean_inputs, Some(batch_size), batch_norm)?;
        Ok(total_loss)
    }

    fn fold_running_statistics(&mut self, statistics: Vec<BatchStatistics>) -> Result<()> {
        for (running, batch) in self.normalization.iter_mut().zip(statistics) {
            match running {
                Some(running) => running.update(&batch)?,
                None => *running = Some(RunningStatistics::new(batch, self.momentum)),
            }
        }
        Ok(())
    }

    /// One pass over `samples` in a freshly shuffled order.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::EmptyDataset`] for no samples and
    /// [`NetworkError::ZeroBatchSize`] for a batch mode with batch size 0.
    pub fn train_one_epoch(&mut self, samples: &[Sample], mode: TrainingMode) -> Result<EpochReport> {
        if samples.is_empty() {
            return Err(NetworkError::EmptyDataset);
        }
        let batch_size = mode.batch_size();
        if batch_size == 0 {
            return Err(NetworkError::ZeroBatchSize);
        }

        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.shuffle(&mut self.rng);

        let mut total_loss = 0.0;
        let mut updates = 0;
        for chunk in order.chunks(batch_size) {
            let batch: Vec<&Sample> = chunk.iter().filter_map(|&index| samples.get(index)).collect();
            total_loss += match mode {
                TrainingMode::Online => {
                    let mut loss = 0.0;
                    for sample in &batch {
                        loss += self.train_sample(sample)?;
                        updates += 1;
                    }
                    loss
                }
                TrainingMode::Batch { .. } => {
                    updates += 1;
                    self.train_batch(&batch, false)?
                }
                TrainingMode::BatchNormalized { .. } => {
                    updates += 1;
                    self.train_batch(&batch, true)?
                }
            };
        }

        self.epochs_completed += 1;
        Ok(EpochReport {
            epoch: self.epochs_completed,
            mean_loss: total_loss / samples.len() as f64,
            samples: samples.len(),
            updates,
        })
    }

    /// Applies the learning-rate schedule for a finished epoch.
    ///
    /// When `should_update(epoch, accuracy)` holds, every layer (and each of
    /// its units) gets `new_rate(epoch, accuracy, current_rate)`.
    ///
    /// # Returns
    ///
    /// `true` once `accuracy` meets the acceptable-accuracy threshold.
    pub fn end_epoch(&mut self, epoch: usize, accuracy: f64) -> bool {
        if self.schedule.should_update(epoch, accuracy) {
            for layer in &mut self.layers {
                let rate = self.schedule.new_rate(epoch, accuracy, layer.learning_rate());
                layer.set_learning_rate(rate);
            }
            tracing::info!(epoch, accuracy, "learning rate updated");
        }
        self.acceptable_accuracy
            .is_some_and(|threshold| accuracy >= threshold)
    }

    /// Trains for up to `max_epochs` epochs.
    ///
    /// After each epoch `on_epoch` measures accuracy (the network itself never
    /// computes it); the schedule is then applied and training stops early
    /// once the accuracy reaches the acceptable threshold.
    pub fn train<F>(&mut self, samples: &[Sample], mode: TrainingMode, mut on_epoch: F) -> Result<TrainingSummary>
    where
        F: FnMut(&Network, &EpochReport) -> f64,
    {
        let mut summary = TrainingSummary {
            epochs_run: 0,
            accuracies: Vec::with_capacity(self.max_epochs),
            losses: Vec::with_capacity(self.max_epochs),
            reached_target: false,
        };

        for _ in 0..self.max_epochs {
            let report = self.train_one_epoch(samples, mode)?;
            let accuracy = on_epoch(&*self, &report);
            tracing::info!(
                epoch = report.epoch,
                mode = %mode,
                loss = report.mean_loss,
                accuracy,
                "epoch finished"
            );

            summary.epochs_run += 1;
            summary.accuracies.push(accuracy);
            summary.losses.push(report.mean_loss);

            if self.end_epoch(report.epoch, accuracy) {
                tracing::info!(epoch = report.epoch, accuracy, "acceptable accuracy reached");
                summary.reached_target = true;
                break;
            }
        }
        Ok(summary)
    }

    /// Captures weights, learning rates, activations and normalization state.
    pub fn to_snapshot(&self) -> NetworkSnapshot {
        let layers = self
            .layers
            .iter()
            .zip(&self.normalization)
            .map(|(layer, running)| {
                let normalization = (running.is_some() || layer.scale() != 1.0 || layer.shift() != 0.0)
                    .then(|| NormalizationSnapshot {
                        scale: layer.scale(),
                        shift: layer.shift(),
                        running: running.as_ref().map(|running| running.statistics().clone()),
                    });
                LayerSnapshot {
                    input_size: layer.input_size(),
                    act_func: layer.activation_type().name().to_string(),
                    learning_rate: layer.learning_rate(),
                    neurons: layer
                        .units()
                        .iter()
                        .map(|unit| NeuronSnapshot::new(unit.weights().to_vec()))
                        .collect(),
                    normalization,
                }
            })
            .collect();
        NetworkSnapshot::new(layers)
    }

    /// Overwrites weights, learning rates, activations and normalization
    /// state from `snapshot` without changing the topology.
    ///
    /// The whole snapshot is validated first. On any error, including an
    /// unknown activation name, the network is left unchanged.
    pub fn restore_from_snapshot(&mut self, snapshot: &NetworkSnapshot) -> Result<()> {
        ensure_len("snapshot layers", self.layers.len(), snapshot.len())?;
        let mut staged = Vec::with_capacity(snapshot.len());
        for (layer, document) in self.layers.iter().zip(snapshot.layers()) {
            ensure_len("snapshot input size", layer.input_size(), document.input_size)?;
            ensure_len("snapshot neurons", layer.unit_count(), document.neurons.len())?;
            staged.push(StagedLayer::from_snapshot(document)?);
        }

        for ((layer, running), layer_staged) in self
            .layers
            .iter_mut()
            .zip(self.normalization.iter_mut())
            .zip(staged)
        {
            layer.set_weights(&layer_staged.weights)?;
            layer.set_activation(layer_staged.activation);
            layer.set_learning_rate(layer_staged.learning_rate);
            layer.set_affine_params(layer_staged.scale, layer_staged.shift);
            layer.clear_batch_state();
            *running = layer_staged
                .running
                .map(|statistics| RunningStatistics::new(statistics, self.momentum));
        }
        tracing::trace!(layers = self.layers.len(), "weights restored");
        Ok(())
    }

    /// Writes the snapshot of this network as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_snapshot().save(path)
    }

    /// Restores weights from a JSON snapshot written by [`Network::save`].
    pub fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let snapshot = NetworkSnapshot::load(path)?;
        self.restore_from_snapshot(&snapshot)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map(Layer::unit_count).unwrap_or_default()
    }

    pub fn loss_type(&self) -> LossType {
        self.loss.loss_type()
    }

    pub fn max_epochs(&self) -> usize {
        self.max_epochs
    }

    pub fn acceptable_accuracy(&self) -> Option<f64> {
        self.acceptable_accuracy
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    pub fn label_encoder(&self) -> &LabelEncoder {
        &self.label_encoder
    }

    /// Running statistics of layer `index`, present after batch-normalized training.
    pub fn running_statistics(&self, index: usize) -> Option<&RunningStatistics> {
        self.normalization.get(index).and_then(Option::as_ref)
    }
}

/// A snapshot layer resolved and checked, ready to be applied.
struct StagedLayer {
    activation: ActivationType,
    weights: Vec<Vec<f64>>,
    learning_rate: f64,
    scale: f64,
    shift: f64,
    running: Option<BatchStatistics>,
}

impl StagedLayer {
    fn from_snapshot(document: &LayerSnapshot) -> Result<Self> {
        let activation = document.activation_type()?;
        let weights = document.weight_rows()?;
        let (scale, shift, running) = match &document.normalization {
            Some(normalization) => {
                let running = normalization
                    .running
                    .as_ref()
                    .map(|statistics| {
                        ensure_len("snapshot statistics", document.input_size, statistics.len())?;
                        BatchStatistics::new(statistics.mean().to_vec(), statistics.deviation().to_vec())
                    })
                    .transpose()?;
                (normalization.scale, normalization.shift, running)
            }
            None => (1.0, 0.0, None),
        };
        Ok(Self {
            activation,
            weights,
            learning_rate: document.learning_rate,
            scale,
            shift,
            running,
        })
    }
}

fn add_into(sum: &mut [f64], values: &[f64]) {
    for (total, value) in sum.iter_mut().zip(values) {
        *total += value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_config::LayerConfig;
    use anyhow::Result;
    use approx::assert_relative_eq;
    use tempfile::NamedTempFile;

    fn scalar_encoder() -> LabelEncoder {
        LabelEncoder::new(|label| vec![label as f64])
    }

    fn one_hot(classes: usize) -> LabelEncoder {
        LabelEncoder::new(move |label| {
            let mut target = vec![0.0; classes];
            if let Some(slot) = target.get_mut(label) {
                *slot = 1.0;
            }
            target
        })
    }

    /// 2 inputs, 2 sigmoid hidden units, 1 sigmoid output, every weight 0.5
    fn pinned_network() -> Network {
        let hidden = Layer::from_weights(vec![vec![0.5; 3]; 2], ActivationType::Sigmoid, 0.1, None).unwrap();
        let output = Layer::from_weights(vec![vec![0.5; 3]], ActivationType::Sigmoid, 0.1, None).unwrap();
        Network::from_layers(vec![hidden, output], LossType::Mse, scalar_encoder(), LearningRateSchedule::constant())
            .unwrap()
    }

    fn seeded_network(seed: u64, sizes: &[usize], loss: LossType, learning_rate: f64) -> Network {
        let layers = sizes
            .iter()
            .skip(1)
            .map(|&units| LayerConfig::new(units, ActivationType::Sigmoid))
            .collect();
        let mut config = NetworkConfig::new(sizes[0], layers, loss, learning_rate, 10);
        config.seed = Some(seed);
        let outputs = *sizes.last().unwrap();
        let encoder = if outputs == 1 { scalar_encoder() } else { one_hot(outputs) };
        Network::new(&config, encoder, LearningRateSchedule::constant()).unwrap()
    }

    fn toy_samples() -> Vec<Sample> {
        vec![
            Sample::new(vec![0.1, 0.9, 0.3], 0),
            Sample::new(vec![0.8, 0.2, 0.5], 1),
            Sample::new(vec![0.4, 0.4, 0.9], 2),
            Sample::new(vec![0.9, 0.7, 0.1], 1),
            Sample::new(vec![0.2, 0.1, 0.6], 0),
            Sample::new(vec![0.6, 0.9, 0.8], 2),
        ]
    }

    fn all_weights(network: &Network) -> Vec<Vec<f64>> {
        network
            .layers()
            .iter()
            .flat_map(|layer| layer.units().iter().map(|unit| unit.weights().to_vec()))
            .collect()
    }

    #[test]
    fn test_concrete_scenario() -> Result<()> {
        let network = pinned_network();
        let hidden = network.layers()[0].evaluate(&[1.0, -1.0], None)?;
        assert_relative_eq!(hidden[0], 0.622459, epsilon = 5e-7);
        assert_relative_eq!(hidden[1], 0.622459, epsilon = 5e-7);

        let expected_u = 0.5 + 0.5 * hidden[0] + 0.5 * hidden[1];
        assert_relative_eq!(expected_u, 1.122459, epsilon = 5e-7);

        let prediction = network.classify(&[1.0, -1.0])?;
        assert_eq!(prediction.len(), 1);
        assert_relative_eq!(prediction[0], 0.754445, epsilon = 5e-7);
        assert_relative_eq!(prediction[0], 1.0 / (1.0 + (-expected_u).exp()), epsilon = 1e-15);
        Ok(())
    }

    #[test]
    fn test_classify_is_deterministic_and_pure() -> Result<()> {
        let network = seeded_network(5, &[3, 4, 3], LossType::CrossEntropy, 0.1);
        let first = network.classify(&[0.3, 0.2, 0.1])?;
        for _ in 0..5 {
            assert_eq!(network.classify(&[0.3, 0.2, 0.1])?, first);
        }
        for layer in network.layers() {
            assert!(layer.accumulator().iter().skip(1).all(|&slot| slot == 0.0));
        }
        Ok(())
    }

    #[test]
    fn test_same_seed_same_network() {
        let a = seeded_network(9, &[3, 4, 3], LossType::Mse, 0.1);
        let b = seeded_network(9, &[3, 4, 3], LossType::Mse, 0.1);
        assert_eq!(all_weights(&a), all_weights(&b));
    }

    #[test]
    fn test_topology_validation() {
        let hidden = Layer::from_weights(vec![vec![0.1; 3]; 2], ActivationType::Relu, 0.1, None).unwrap();
        let output = Layer::from_weights(vec![vec![0.1; 4]], ActivationType::Sigmoid, 0.1, None).unwrap();
        let result = Network::from_layers(
            vec![hidden, output],
            LossType::Mse,
            scalar_encoder(),
            LearningRateSchedule::constant(),
        );
        assert!(matches!(
            result,
            Err(NetworkError::DimensionMismatch { context: "layer chain", .. })
        ));

        let mut config = NetworkConfig::default();
        config.seed = Some(1);
        let result = Network::new(&config, one_hot(3), LearningRateSchedule::constant());
        assert!(matches!(
            result,
            Err(NetworkError::DimensionMismatch {
                context: "label encoder output",
                expected: 10,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_only_output_layer_has_loss() {
        let network = seeded_network(2, &[3, 4, 3], LossType::Mse, 0.1);
        let (output, hidden) = network.layers().split_last().unwrap();
        assert!(output.units().iter().all(|unit| unit.loss().is_some()));
        assert!(hidden
            .iter()
            .all(|layer| layer.units().iter().all(|unit| unit.loss().is_none())));
    }

    #[test]
    fn test_classify_rejects_wrong_input() {
        let network = pinned_network();
        assert!(matches!(
            network.classify(&[1.0, 2.0, 3.0]),
            Err(NetworkError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_online_update_reduces_loss() -> Result<()> {
        for seed in [1, 2, 3, 4] {
            let mut network = seeded_network(seed, &[1, 1, 1], LossType::Mse, 0.01);
            let sample = Sample::new(vec![0.7], 1);
            let before = network.sample_loss(&sample)?;
            let reported = network.train_sample(&sample)?;
            let after = network.sample_loss(&sample)?;
            assert_relative_eq!(reported, before, epsilon = 1e-15);
            assert!(after < before, "seed {seed}: {after} >= {before}");
        }
        Ok(())
    }

    #[test]
    fn test_accumulators_reset_after_training_step() -> Result<()> {
        let mut network = seeded_network(4, &[3, 5, 3], LossType::Mse, 0.1);
        let samples = toy_samples();
        network.train_sample(&samples[0])?;
        let batch: Vec<&Sample> = samples.iter().collect();
        network.train_batch(&batch, false)?;
        for layer in network.layers() {
            assert_eq!(layer.accumulator()[0], 1.0);
            assert!(layer.accumulator().iter().skip(1).all(|&slot| slot == 0.0));
            assert!(layer.units().iter().all(|unit| unit.accumulated_u() == 0.0));
        }
        Ok(())
    }

    #[test]
    fn test_single_sample_batches_match_online() -> Result<()> {
        let samples = toy_samples();
        let mut online = seeded_network(21, &[3, 4, 3], LossType::Mse, 0.2);
        let mut batched = online.clone();

        let online_report = online.train_one_epoch(&samples, TrainingMode::Online)?;
        let batch_report = batched.train_one_epoch(&samples, TrainingMode::Batch { batch_size: 1 })?;

        assert_eq!(all_weights(&online), all_weights(&batched));
        assert_eq!(online_report.updates, 6);
        assert_eq!(batch_report.updates, 6);
        assert_relative_eq!(online_report.mean_loss, batch_report.mean_loss);
        Ok(())
    }

    #[test]
    fn test_batch_of_duplicates_matches_one_online_step() -> Result<()> {
        let sample = Sample::new(vec![0.3, 0.6, 0.2], 2);
        let mut online = seeded_network(8, &[3, 4, 3], LossType::CrossEntropy, 0.1);
        let mut batched = online.clone();

        online.train_sample(&sample)?;
        batched.train_batch(&[&sample, &sample, &sample], false)?;

        for (a, b) in all_weights(&online).iter().zip(all_weights(&batched).iter()) {
            for (x, y) in a.iter().zip(b) {
                assert_relative_eq!(x, y, epsilon = 1e-12);
            }
        }
        Ok(())
    }

    #[test]
    fn test_batch_update_applies_mean_output_gradient() -> Result<()> {
        let weights = vec![0.1, 0.2, -0.3];
        let layer = Layer::from_weights(vec![weights.clone()], ActivationType::Sigmoid, 0.5, None)?;
        let mut network = Network::from_layers(
            vec![layer],
            LossType::Mse,
            scalar_encoder(),
            LearningRateSchedule::constant(),
        )?;
        let first = Sample::new(vec![1.0, 0.0], 1);
        let second = Sample::new(vec![0.0, 1.0], 0);

        let sigmoid = ActivationType::Sigmoid.create();
        let mse = LossType::Mse.create();
        let gradient = |sample: &Sample| {
            let u = weights[0] + weights[1] * sample.input[0] + weights[2] * sample.input[1];
            let predicted = sigmoid.value(u);
            sigmoid.derivative(u) * mse.derivative(predicted, sample.label as f64)
        };
        let mean_gradient = (gradient(&first) + gradient(&second)) / 2.0;
        let mean_inputs = [1.0, 0.5, 0.5];

        network.train_batch(&[&first, &second], false)?;
        let unit = &network.layers()[0].units()[0];
        assert_relative_eq!(unit.gradient(), mean_gradient, epsilon = 1e-15);
        for ((weight, start), input) in unit.weights().iter().zip(&weights).zip(mean_inputs) {
            assert_relative_eq!(*weight, start - 0.5 * mean_gradient * input, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_rejected_batch_leaves_network_unchanged() -> Result<()> {
        let samples = toy_samples();
        let short = Sample::new(vec![0.1, 0.2], 1);

        for batch_norm in [false, true] {
            let mut network = seeded_network(12, &[3, 4, 3], LossType::Mse, 0.2);
            let mut clean = network.clone();

            assert!(matches!(
                network.train_batch(&[&samples[0], &samples[1], &short], batch_norm),
                Err(NetworkError::DimensionMismatch { expected: 3, actual: 2, .. })
            ));
            assert_eq!(all_weights(&network), all_weights(&clean));
            for layer in network.layers() {
                assert_eq!(layer.accumulator()[0], 1.0);
                assert!(layer.accumulator().iter().skip(1).all(|&slot| slot == 0.0));
                assert!(layer.units().iter().all(|unit| unit.accumulated_u() == 0.0));
            }

            let batch = [&samples[2], &samples[3]];
            network.train_batch(&batch, batch_norm)?;
            clean.train_batch(&batch, batch_norm)?;
            assert_eq!(all_weights(&network), all_weights(&clean));
            assert!(network.running_statistics(0) == clean.running_statistics(0));
        }
        Ok(())
    }

    #[test]
    fn test_batch_norm_training() -> Result<()> {
        let samples = toy_samples();
        let mut network = seeded_network(13, &[3, 4, 3], LossType::Mse, 0.1);
        let report = network.train_one_epoch(&samples, TrainingMode::BatchNormalized { batch_size: 3 })?;
        assert_eq!(report.updates, 2);
        assert!(report.mean_loss.is_finite());

        for (index, layer) in network.layers().iter().enumerate() {
            let running = network.running_statistics(index).unwrap();
            assert_eq!(running.statistics().len(), layer.input_size());
            assert!(layer.scale() != 1.0 || layer.shift() != 0.0);
            assert!(layer.accumulator().iter().skip(1).all(|&slot| slot == 0.0));
        }
        let prediction = network.classify(&samples[0].input)?;
        assert!(prediction.iter().all(|p| p.is_finite()));
        Ok(())
    }

    #[test]
    fn test_zero_batch_size_and_empty_dataset() {
        let mut network = seeded_network(3, &[3, 4, 3], LossType::Mse, 0.1);
        assert!(matches!(
            network.train_one_epoch(&toy_samples(), TrainingMode::Batch { batch_size: 0 }),
            Err(NetworkError::ZeroBatchSize)
        ));
        assert!(matches!(
            network.train_one_epoch(&[], TrainingMode::Online),
            Err(NetworkError::EmptyDataset)
        ));
        assert!(matches!(network.train_batch(&[], false), Err(NetworkError::EmptyDataset)));
    }

    #[test]
    fn test_encoder_length_checked_per_label() {
        let encoder = LabelEncoder::new(|label| vec![0.0; label.max(1)]);
        let output = Layer::from_weights(vec![vec![0.1; 3]], ActivationType::Sigmoid, 0.1, None).unwrap();
        let mut network =
            Network::from_layers(vec![output], LossType::Mse, encoder, LearningRateSchedule::constant()).unwrap();
        assert!(matches!(
            network.train_sample(&Sample::new(vec![0.1, 0.2], 3)),
            Err(NetworkError::DimensionMismatch { context: "encoded label", .. })
        ));
    }

    #[test]
    fn test_train_stops_at_acceptable_accuracy() -> Result<()> {
        let mut network = seeded_network(6, &[3, 4, 3], LossType::Mse, 0.1).with_acceptable_accuracy(0.75);
        let mut calls = 0;
        let summary = network.train(&toy_samples(), TrainingMode::Online, |_, _| {
            calls += 1;
            if calls == 3 {
                0.8
            } else {
                0.1
            }
        })?;
        assert_eq!(summary.epochs_run, 3);
        assert!(summary.reached_target);
        assert_eq!(summary.final_accuracy(), Some(0.8));
        assert_eq!(network.epochs_completed(), 3);
        Ok(())
    }

    #[test]
    fn test_train_runs_max_epochs() -> Result<()> {
        let mut network = seeded_network(6, &[3, 4, 3], LossType::Mse, 0.1).with_max_epochs(4);
        let summary = network.train(&toy_samples(), TrainingMode::Batch { batch_size: 2 }, |_, _| 0.0)?;
        assert_eq!(summary.epochs_run, 4);
        assert!(!summary.reached_target);
        assert_eq!(summary.losses.len(), 4);
        Ok(())
    }

    #[test]
    fn test_schedule_updates_every_unit() -> Result<()> {
        let mut config = NetworkConfig::new(
            3,
            vec![
                LayerConfig::new(4, ActivationType::Tanh).with_learning_rate(0.4),
                LayerConfig::new(3, ActivationType::Sigmoid),
            ],
            LossType::Mse,
            0.2,
            3,
        );
        config.seed = Some(17);
        let mut network = Network::new(&config, one_hot(3), LearningRateSchedule::step_decay(1, 0.5))?;
        network.train(&toy_samples(), TrainingMode::Online, |_, _| 0.0)?;

        let rates: Vec<f64> = network.layers().iter().map(Layer::learning_rate).collect();
        assert_relative_eq!(rates[0], 0.05);
        assert_relative_eq!(rates[1], 0.025);
        for layer in network.layers() {
            assert!(layer.units().iter().all(|unit| unit.learning_rate() == layer.learning_rate()));
        }
        Ok(())
    }

    #[test]
    fn test_snapshot_round_trip_is_exact() -> Result<()> {
        let mut network = seeded_network(31, &[3, 4, 3], LossType::Mse, 0.1);
        network.train_one_epoch(&toy_samples(), TrainingMode::Online)?;
        let snapshot = network.to_snapshot();

        let mut restored = seeded_network(99, &[3, 4, 3], LossType::Mse, 0.7);
        restored.restore_from_snapshot(&NetworkSnapshot::from_json(&snapshot.to_json()?)?)?;

        assert_eq!(all_weights(&restored), all_weights(&network));
        for (a, b) in restored.layers().iter().zip(network.layers()) {
            assert_eq!(a.learning_rate(), b.learning_rate());
            assert_eq!(a.input_size(), b.input_size());
            assert_eq!(a.activation_type().name(), b.activation_type().name());
        }
        assert_eq!(restored.to_snapshot(), snapshot);
        Ok(())
    }

    #[test]
    fn test_save_and_load_weights() -> Result<()> {
        let mut network = seeded_network(12, &[3, 4, 3], LossType::Mse, 0.1);
        network.train_one_epoch(&toy_samples(), TrainingMode::BatchNormalized { batch_size: 2 })?;

        let temp_file = NamedTempFile::new()?;
        network.save(temp_file.path())?;
        let file_content = std::fs::read_to_string(temp_file.path())?;
        assert!(file_content.contains("\"actFunc\": \"sigmoid\""));
        assert!(file_content.contains("normalization"));

        let mut restored = seeded_network(50, &[3, 4, 3], LossType::Mse, 0.1);
        restored.load_weights(temp_file.path())?;
        let input = [0.5, 0.1, 0.7];
        assert_eq!(restored.classify(&input)?, network.classify(&input)?);

        let rebuilt = Network::from_snapshot(
            &NetworkSnapshot::load(temp_file.path())?,
            LossType::Mse,
            one_hot(3),
            LearningRateSchedule::constant(),
        )?;
        assert_eq!(rebuilt.classify(&input)?, network.classify(&input)?);
        Ok(())
    }

    #[test]
    fn test_unknown_activation_leaves_network_unchanged() -> Result<()> {
        let mut network = seeded_network(7, &[3, 4, 3], LossType::Mse, 0.1);
        let before = network.to_snapshot();

        let mut other = seeded_network(8, &[3, 4, 3], LossType::Mse, 0.1).to_snapshot();
        let mut json: serde_json::Value = serde_json::from_str(&other.to_json()?)?;
        json[1]["layer"]["actFunc"] = serde_json::Value::from("mystery");
        other = NetworkSnapshot::from_json(&json.to_string())?;

        let result = network.restore_from_snapshot(&other);
        assert!(matches!(
            result,
            Err(NetworkError::UnknownActivationFunction(name)) if name == "mystery"
        ));
        assert_eq!(network.to_snapshot(), before);
        Ok(())
    }

    #[test]
    fn test_restore_rejects_other_topology() {
        let mut network = seeded_network(7, &[3, 4, 3], LossType::Mse, 0.1);
        let before = network.to_snapshot();
        let other = seeded_network(7, &[3, 5, 3], LossType::Mse, 0.1).to_snapshot();
        assert!(network.restore_from_snapshot(&other).is_err());
        assert_eq!(network.to_snapshot(), before);
    }
}
