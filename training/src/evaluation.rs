//! Accuracy measurement for classifiers built on [`Network`].
//!
//! The network itself never computes accuracy; these helpers are what a
//! trainer passes back into [`Network::end_epoch`].

use crate::error::{Result, TrainingError};
use perceptron::{LabelEncoder, Network, Sample};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;

/// Index of the largest output, the first one on ties. `None` for an empty slice.
pub fn predicted_class(output: &[f64]) -> Option<usize> {
    output
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.total_cmp(b).then(ib.cmp(ia)))
        .map(|(idx, _)| idx)
}

/// One-hot label encoder over `classes` outputs.
///
/// Labels outside `0..classes` encode to all zeros.
pub fn one_hot(classes: usize) -> LabelEncoder {
    LabelEncoder::new(move |label| {
        let mut target = vec![0.0; classes];
        if let Some(slot) = target.get_mut(label) {
            *slot = 1.0;
        }
        target
    })
}

/// Fraction of `samples` whose predicted class equals their label.
///
/// A single-output network is read as a binary classifier thresholded at 0.5.
pub fn accuracy(network: &Network, samples: &[Sample]) -> Result<f64> {
    if samples.is_empty() {
        return Err(TrainingError::EmptyEvaluationSet);
    }
    let mut correct = 0;
    for sample in samples {
        let output = network.classify(&sample.input)?;
        if class_of(&output) == Some(sample.label) {
            correct += 1;
        }
    }
    Ok(correct as f64 / samples.len() as f64)
}

fn class_of(output: &[f64]) -> Option<usize> {
    match output {
        [single] => Some(usize::from(*single >= 0.5)),
        _ => predicted_class(output),
    }
}

/// Shuffles `samples` and splits off `fraction` of them as a holdout set.
///
/// Returns `(training, holdout)`.
pub fn holdout_split<R: Rng + ?Sized>(
    mut samples: Vec<Sample>,
    fraction: f64,
    rng: &mut R,
) -> Result<(Vec<Sample>, Vec<Sample>)> {
    if !(0.0..1.0).contains(&fraction) {
        return Err(TrainingError::InvalidHoldout(fraction));
    }
    samples.shuffle(rng);
    let holdout_len = (samples.len() as f64 * fraction).round() as usize;
    let holdout = samples.split_off(samples.len() - holdout_len);
    Ok((samples, holdout))
}

/// Counts of (actual, predicted) class pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    classes: usize,
    counts: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            counts: vec![0; classes * classes],
        }
    }

    /// Classifies every sample and tallies the outcome.
    pub fn from_network(network: &Network, samples: &[Sample]) -> Result<Self> {
        let classes = network.output_size().max(2);
        let mut matrix = Self::new(classes);
        for sample in samples {
            let output = network.classify(&sample.input)?;
            let predicted = class_of(&output).unwrap_or_default();
            matrix.record(sample.label, predicted)?;
        }
        Ok(matrix)
    }

    pub fn record(&mut self, actual: usize, predicted: usize) -> Result<()> {
        for label in [actual, predicted] {
            if label >= self.classes {
                return Err(TrainingError::LabelOutOfRange {
                    label,
                    classes: self.classes,
                });
            }
        }
        if let Some(count) = self.counts.get_mut(actual * self.classes + predicted) {
            *count += 1;
        }
        Ok(())
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    /// Number of samples of class `actual` predicted as `predicted`.
    pub fn count(&self, actual: usize, predicted: usize) -> usize {
        if actual >= self.classes || predicted >= self.classes {
            return 0;
        }
        self.counts
            .get(actual * self.classes + predicted)
            .copied()
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Diagonal over total, 0 when nothing was recorded.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.classes).map(|class| self.count(class, class)).sum();
        correct as f64 / total as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actual\\pred")?;
        for predicted in 0..self.classes {
            write!(f, " {predicted:>6}")?;
        }
        writeln!(f)?;
        for actual in 0..self.classes {
            write!(f, "{actual:>11}")?;
            for predicted in 0..self.classes {
                write!(f, " {:>6}", self.count(actual, predicted))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
