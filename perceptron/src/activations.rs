use crate::error::NetworkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Slope used by [`LeakyRelu`] for negative inputs.
pub const LEAKY_RELU_SLOPE: f64 = 0.01;

/// Type of activation function.
///
/// The enum doubles as the name registry used by persisted models: every
/// variant has a stable name returned by [`ActivationType::name`] and parsed
/// back by [`FromStr`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivationType {
    Identity,
    Sigmoid,
    Tanh,
    Relu,
    LeakyRelu,
    Softplus,
}

impl ActivationType {
    /// Every registered activation, in declaration order.
    pub const ALL: [ActivationType; 6] = [
        ActivationType::Identity,
        ActivationType::Sigmoid,
        ActivationType::Tanh,
        ActivationType::Relu,
        ActivationType::LeakyRelu,
        ActivationType::Softplus,
    ];

    /// Creates a shared activation function instance based on the type.
    ///
    /// A layer holds the returned handle and hands clones of it to its units,
    /// so every unit of the layer evaluates the same function object.
    pub fn create(&self) -> Arc<dyn ActivationFunction> {
        match self {
            ActivationType::Identity => Arc::new(Identity),
            ActivationType::Sigmoid => Arc::new(Sigmoid),
            ActivationType::Tanh => Arc::new(Tanh),
            ActivationType::Relu => Arc::new(Relu),
            ActivationType::LeakyRelu => Arc::new(LeakyRelu),
            ActivationType::Softplus => Arc::new(Softplus),
        }
    }

    /// Stable name written to and read from persisted models.
    pub fn name(&self) -> &'static str {
        match self {
            ActivationType::Identity => "identity",
            ActivationType::Sigmoid => "sigmoid",
            ActivationType::Tanh => "tanh",
            ActivationType::Relu => "relu",
            ActivationType::LeakyRelu => "leaky_relu",
            ActivationType::Softplus => "softplus",
        }
    }
}

impl fmt::Display for ActivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActivationType {
    type Err = NetworkError;

    /// Resolves a persisted name, ignoring ASCII case.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::UnknownActivationFunction`] for unregistered names.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ActivationType::ALL
            .into_iter()
            .find(|candidate| candidate.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| NetworkError::UnknownActivationFunction(name.to_string()))
    }
}

/// Trait defining the interface for activation functions.
///
/// Both methods take the pre-activation `u` (the weighted sum), not the
/// activated output.
pub trait ActivationFunction: Send + Sync + fmt::Debug {
    /// Applies the activation function to the weighted sum
    fn value(&self, u: f64) -> f64;

    /// Derivative of the activation with respect to the weighted sum
    fn derivative(&self, u: f64) -> f64;

    /// Returns the type of activation function
    fn activation_type(&self) -> ActivationType;

    /// Registry name, see [`ActivationType::name`]
    fn name(&self) -> &'static str {
        self.activation_type().name()
    }
}

/// f(u) = u
#[derive(Debug, Clone, Copy)]
pub struct Identity;

impl ActivationFunction for Identity {
    fn value(&self, u: f64) -> f64 {
        u
    }

    fn derivative(&self, _u: f64) -> f64 {
        1.0
    }

    fn activation_type(&self) -> ActivationType {
        ActivationType::Identity
    }
}

/// Logistic sigmoid: f(u) = 1 / (1 + e^-u), f'(u) = f(u)(1 - f(u))
#[derive(Debug, Clone, Copy)]
pub struct Sigmoid;

pub(crate) fn sigmoid(u: f64) -> f64 {
    1.0 / (1.0 + (-u).exp())
}

impl ActivationFunction for Sigmoid {
    fn value(&self, u: f64) -> f64 {
        sigmoid(u)
    }

    fn derivative(&self, u: f64) -> f64 {
        let s = sigmoid(u);
        s * (1.0 - s)
    }

    fn activation_type(&self) -> ActivationType {
        ActivationType::Sigmoid
    }
}

/// Hyperbolic tangent: f'(u) = 1 - tanh(u)^2
#[derive(Debug, Clone, Copy)]
pub struct Tanh;

impl ActivationFunction for Tanh {
    fn value(&self, u: f64) -> f64 {
        u.tanh()
    }

    fn derivative(&self, u: f64) -> f64 {
        let t = u.tanh();
        1.0 - t * t
    }

    fn activation_type(&self) -> ActivationType {
        ActivationType::Tanh
    }
}

/// Rectified linear unit. The derivative at exactly 0 is taken as 0.
#[derive(Debug, Clone, Copy)]
pub struct Relu;

impl ActivationFunction for Relu {
    fn value(&self, u: f64) -> f64 {
        u.max(0.0)
    }

    fn derivative(&self, u: f64) -> f64 {
        if u > 0.0 {
            1.0
        } else {
            0.0
        }
    }

    fn activation_type(&self) -> ActivationType {
        ActivationType::Relu
    }
}

/// Leaky ReLU with slope [`LEAKY_RELU_SLOPE`] for negative inputs.
#[derive(Debug, Clone, Copy)]
pub struct LeakyRelu;

impl ActivationFunction for LeakyRelu {
    fn value(&self, u: f64) -> f64 {
        if u > 0.0 {
            u
        } else {
            LEAKY_RELU_SLOPE * u
        }
    }

    fn derivative(&self, u: f64) -> f64 {
        if u > 0.0 {
            1.0
        } else {
            LEAKY_RELU_SLOPE
        }
    }

    fn activation_type(&self) -> ActivationType {
        ActivationType::LeakyRelu
    }
}

/// Softplus: f(u) = ln(1 + e^u), f'(u) = sigmoid(u)
#[derive(Debug, Clone, Copy)]
pub struct Softplus;

impl ActivationFunction for Softplus {
    fn value(&self, u: f64) -> f64 {
        // ln(1 + e^u) = max(u, 0) + ln(1 + e^-|u|), stable for large |u|
        u.max(0.0) + (-u.abs()).exp().ln_1p()
    }

    fn derivative(&self, u: f64) -> f64 {
        sigmoid(u)
    }

    fn activation_type(&self) -> ActivationType {
        ActivationType::Softplus
    }
}
