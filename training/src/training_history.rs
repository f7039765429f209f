use std::fmt;

/// Training history containing metrics recorded during training
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    /// Accuracy values for each epoch, as fractions in [0, 1]
    pub accuracies: Vec<f64>,
    /// Mean training loss for each epoch
    pub losses: Vec<f64>,
    /// Best accuracy achieved during training
    pub best_accuracy: f64,
    /// Epoch where best accuracy was achieved
    pub best_epoch: usize,
    /// Set when the run ended before the epoch limit
    pub stopped_early: Option<StopReason>,
}

/// Why a run ended before its epoch limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The network's acceptable-accuracy threshold was met
    TargetReached,
    /// Accuracy stopped improving for the configured patience
    Plateau,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_epoch(&mut self, epoch: usize, accuracy: f64, loss: f64) {
        let first = self.accuracies.is_empty();
        self.accuracies.push(accuracy);
        self.losses.push(loss);

        if first || accuracy > self.best_accuracy {
            self.best_accuracy = accuracy;
            self.best_epoch = epoch;
        }
    }

    pub fn epochs(&self) -> usize {
        self.accuracies.len()
    }

    pub fn final_accuracy(&self) -> Option<f64> {
        self.accuracies.last().copied()
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.losses.last().copied()
    }

    /// Prints a summary of the training history
    pub fn print_summary(&self) {
        println!("\n{self}");
    }
}

impl fmt::Display for TrainingHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Training History Summary:")?;
        writeln!(f, "------------------------")?;
        writeln!(
            f,
            "Best accuracy: {:.2}% (epoch {})",
            self.best_accuracy * 100.0,
            self.best_epoch
        )?;
        writeln!(
            f,
            "Final accuracy: {:.2}%",
            self.final_accuracy().unwrap_or_default() * 100.0
        )?;
        writeln!(f, "Final loss: {:.4}", self.final_loss().unwrap_or_default())?;
        match self.stopped_early {
            Some(StopReason::TargetReached) => writeln!(f, "Stopped early: acceptable accuracy reached")?,
            Some(StopReason::Plateau) => writeln!(f, "Stopped early: accuracy plateaued")?,
            None => {}
        }

        // Accuracy progression at 25% intervals
        let len = self.accuracies.len();
        if len >= 4 {
            writeln!(f, "\nAccuracy progression:")?;
            for i in 0..=3 {
                let idx = i * (len - 1) / 3;
                if let (Some(accuracy), Some(loss)) = (self.accuracies.get(idx), self.losses.get(idx)) {
                    writeln!(
                        f,
                        "Epoch {}: {:.2}% (loss: {:.4})",
                        idx + 1,
                        accuracy * 100.0,
                        loss
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_epoch_tracks_best() {
        let mut history = TrainingHistory::new();
        history.record_epoch(1, 0.5, 0.9);
        history.record_epoch(2, 0.75, 0.6);
        history.record_epoch(3, 0.7, 0.5);

        assert_eq!(history.epochs(), 3);
        assert_eq!(history.best_accuracy, 0.75);
        assert_eq!(history.best_epoch, 2);
        assert_eq!(history.final_accuracy(), Some(0.7));
        assert_eq!(history.final_loss(), Some(0.5));
    }

    #[test]
    fn test_best_epoch_is_a_recorded_epoch() {
        let mut history = TrainingHistory::new();
        history.record_epoch(1, 0.0, 0.9);
        history.record_epoch(2, 0.0, 0.8);

        assert_eq!(history.best_epoch, 1);
        assert_eq!(history.best_accuracy, 0.0);
    }

    #[test]
    fn test_summary_text() {
        let mut history = TrainingHistory::new();
        for epoch in 1..=4 {
            history.record_epoch(epoch, epoch as f64 / 4.0, 1.0 / epoch as f64);
        }
        history.stopped_early = Some(StopReason::TargetReached);

        let summary = history.to_string();
        assert!(summary.contains("Best accuracy: 100.00% (epoch 4)"));
        assert!(summary.contains("Epoch 1: 25.00% (loss: 1.0000)"));
        assert!(summary.contains("acceptable accuracy reached"));
    }
}
