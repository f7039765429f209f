use crate::error::NetworkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Offset that keeps the cross-entropy logarithms finite at 0 and 1.
pub const CROSS_ENTROPY_EPSILON: f64 = 1e-12;

/// Type of loss function attached to the output layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    Mae,
    Mse,
    Rmse,
    CrossEntropy,
}

impl LossType {
    pub const ALL: [LossType; 4] = [
        LossType::Mae,
        LossType::Mse,
        LossType::Rmse,
        LossType::CrossEntropy,
    ];

    /// Creates a shared loss function instance based on the type
    pub fn create(&self) -> Arc<dyn LossFunction> {
        match self {
            LossType::Mae => Arc::new(MeanAbsoluteError),
            LossType::Mse => Arc::new(MeanSquaredError),
            LossType::Rmse => Arc::new(RootMeanSquaredError),
            LossType::CrossEntropy => Arc::new(CrossEntropy),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LossType::Mae => "mae",
            LossType::Mse => "mse",
            LossType::Rmse => "rmse",
            LossType::CrossEntropy => "cross_entropy",
        }
    }
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossType {
    type Err = NetworkError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        LossType::ALL
            .into_iter()
            .find(|candidate| candidate.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| NetworkError::UnknownLossFunction(name.to_string()))
    }
}

/// Trait defining the interface for per-output loss functions.
///
/// Every method works on one scalar output. The network sums or averages
/// across outputs and samples itself.
pub trait LossFunction: Send + Sync + fmt::Debug {
    /// Error of a single prediction against its target
    fn value(&self, predicted: f64, correct: f64) -> f64;

    /// Derivative of [`LossFunction::value`] with respect to `predicted`
    fn derivative(&self, predicted: f64, correct: f64) -> f64;

    /// Returns the type of loss function
    fn loss_type(&self) -> LossType;
}

/// |p - c|
#[derive(Debug, Clone, Copy)]
pub struct MeanAbsoluteError;

impl LossFunction for MeanAbsoluteError {
    fn value(&self, predicted: f64, correct: f64) -> f64 {
        (predicted - correct).abs()
    }

    fn derivative(&self, predicted: f64, correct: f64) -> f64 {
        let difference = predicted - correct;
        if difference == 0.0 {
            0.0
        } else {
            difference.signum()
        }
    }

    fn loss_type(&self) -> LossType {
        LossType::Mae
    }
}

/// (p - c)^2
#[derive(Debug, Clone, Copy)]
pub struct MeanSquaredError;

impl LossFunction for MeanSquaredError {
    fn value(&self, predicted: f64, correct: f64) -> f64 {
        (predicted - correct).powi(2)
    }

    fn derivative(&self, predicted: f64, correct: f64) -> f64 {
        2.0 * (predicted - correct)
    }

    fn loss_type(&self) -> LossType {
        LossType::Mse
    }
}

/// sqrt((p - c)^2). Its derivative is undefined at p == c and reported as 0.
#[derive(Debug, Clone, Copy)]
pub struct RootMeanSquaredError;

impl LossFunction for RootMeanSquaredError {
    fn value(&self, predicted: f64, correct: f64) -> f64 {
        (predicted - correct).powi(2).sqrt()
    }

    fn derivative(&self, predicted: f64, correct: f64) -> f64 {
        let root = self.value(predicted, correct);
        if root == 0.0 {
            0.0
        } else {
            (predicted - correct) / root
        }
    }

    fn loss_type(&self) -> LossType {
        LossType::Rmse
    }
}

/// Binary cross entropy applied independently to each output unit.
#[derive(Debug, Clone, Copy)]
pub struct CrossEntropy;

impl LossFunction for CrossEntropy {
    fn value(&self, predicted: f64, correct: f64) -> f64 {
        let eps = CROSS_ENTROPY_EPSILON;
        -(correct * (predicted + eps).ln() + (1.0 - correct) * (1.0 - predicted + eps).ln())
    }

    fn derivative(&self, predicted: f64, correct: f64) -> f64 {
        let eps = CROSS_ENTROPY_EPSILON;
        (predicted - correct) / ((predicted + eps) * (1.0 - predicted + eps))
    }

    fn loss_type(&self) -> LossType {
        LossType::CrossEntropy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_values() {
        assert_relative_eq!(LossType::Mae.create().value(0.25, 1.0), 0.75);
        assert_relative_eq!(LossType::Mse.create().value(0.25, 1.0), 0.5625);
        assert_relative_eq!(LossType::Rmse.create().value(0.25, 1.0), 0.75);
        assert_relative_eq!(
            LossType::CrossEntropy.create().value(0.5, 1.0),
            std::f64::consts::LN_2,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let h = 1e-6;
        for loss_type in LossType::ALL {
            let loss = loss_type.create();
            for &(p, c) in &[(0.3, 1.0), (0.8, 0.0), (0.55, 0.2)] {
                let numeric = (loss.value(p + h, c) - loss.value(p - h, c)) / (2.0 * h);
                assert_relative_eq!(loss.derivative(p, c), numeric, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_zero_difference_derivatives() {
        assert_eq!(LossType::Mae.create().derivative(0.4, 0.4), 0.0);
        assert_eq!(LossType::Rmse.create().derivative(0.4, 0.4), 0.0);
        assert_eq!(LossType::Mse.create().derivative(0.4, 0.4), 0.0);
    }

    #[test]
    fn test_cross_entropy_is_finite_at_bounds() {
        let loss = LossType::CrossEntropy.create();
        assert!(loss.value(0.0, 1.0).is_finite());
        assert!(loss.value(1.0, 0.0).is_finite());
        assert!(loss.derivative(1.0, 0.0).is_finite());
    }

    #[test]
    fn test_names() {
        for loss_type in LossType::ALL {
            assert_eq!(loss_type.name().parse::<LossType>().unwrap(), loss_type);
            assert_eq!(loss_type.create().loss_type(), loss_type);
        }
        assert!(matches!(
            "hinge".parse::<LossType>(),
            Err(NetworkError::UnknownLossFunction(_))
        ));
    }
}
