//! Callbacks injected into a [`Network`](crate::Network) at construction.

use std::fmt;
use std::sync::Arc;

type EncodeFn = dyn Fn(usize) -> Vec<f64> + Send + Sync;
type GateFn = dyn Fn(usize, f64) -> bool + Send + Sync;
type RateFn = dyn Fn(usize, f64, f64) -> f64 + Send + Sync;

/// Converts a label index into the target vector the output layer is trained on.
///
/// The network never assumes an encoding. Every label goes through this function.
///
/// # Examples
///
/// ```
/// use perceptron::LabelEncoder;
///
/// let encoder = LabelEncoder::new(|label| if label == 1 { vec![1.0] } else { vec![0.0] });
/// assert_eq!(encoder.encode(1), vec![1.0]);
/// ```
#[derive(Clone)]
pub struct LabelEncoder {
    encode: Arc<EncodeFn>,
}

impl LabelEncoder {
    pub fn new<F>(encode: F) -> Self
    where
        F: Fn(usize) -> Vec<f64> + Send + Sync + 'static,
    {
        Self {
            encode: Arc::new(encode),
        }
    }

    pub fn encode(&self, label: usize) -> Vec<f64> {
        (self.encode)(label)
    }

    /// Length of the vectors this encoder produces, probed with label 0.
    pub fn output_len(&self) -> usize {
        self.encode(0).len()
    }
}

impl fmt::Debug for LabelEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelEncoder")
            .field("output_len", &self.output_len())
            .finish()
    }
}

/// Learning-rate schedule consulted after every epoch.
///
/// `should_update(epoch, accuracy)` gates the change and
/// `new_rate(epoch, accuracy, current_rate)` computes the replacement, which is
/// applied to every unit of every layer.
#[derive(Clone)]
pub struct LearningRateSchedule {
    should_update: Arc<GateFn>,
    new_rate: Arc<RateFn>,
}

impl LearningRateSchedule {
    pub fn new<G, R>(should_update: G, new_rate: R) -> Self
    where
        G: Fn(usize, f64) -> bool + Send + Sync + 'static,
        R: Fn(usize, f64, f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            should_update: Arc::new(should_update),
            new_rate: Arc::new(new_rate),
        }
    }

    /// A schedule that never changes the rate.
    pub fn constant() -> Self {
        Self::new(|_, _| false, |_, _, rate| rate)
    }

    /// Multiplies the rate by `factor` every `every` epochs.
    ///
    /// # Examples
    ///
    /// ```
    /// use perceptron::LearningRateSchedule;
    ///
    /// let schedule = LearningRateSchedule::step_decay(2, 0.5);
    /// assert!(!schedule.should_update(1, 0.0));
    /// assert!(schedule.should_update(2, 0.0));
    /// assert_eq!(schedule.new_rate(2, 0.0, 0.1), 0.05);
    /// ```
    pub fn step_decay(every: usize, factor: f64) -> Self {
        Self::new(
            move |epoch, _| every > 0 && epoch > 0 && epoch % every == 0,
            move |_, _, rate| rate * factor,
        )
    }

    pub fn should_update(&self, epoch: usize, accuracy: f64) -> bool {
        (self.should_update)(epoch, accuracy)
    }

    pub fn new_rate(&self, epoch: usize, accuracy: f64, current_rate: f64) -> f64 {
        (self.new_rate)(epoch, accuracy, current_rate)
    }
}

impl Default for LearningRateSchedule {
    fn default() -> Self {
        Self::constant()
    }
}

impl fmt::Debug for LearningRateSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearningRateSchedule").finish_non_exhaustive()
    }
}
