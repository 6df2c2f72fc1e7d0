use serde::{Serialize, Deserialize};

use crate::math::Matrix;

/// Element-wise nonlinearity of a hidden layer.
///
/// The output layer of a segmentation network stays `Identity`; class
/// probabilities come from the softmax inside the pixel-wise cross-entropy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActivationFunction {
    Sigmoid,
    ReLU,
    Identity,
    Tanh,
    LeakyReLU { alpha: f64 },
    Elu { alpha: f64 },
}

impl ActivationFunction {
    pub fn function(&self, x: f64) -> f64 {
        match *self {
            ActivationFunction::Sigmoid => sigmoid(x),
            ActivationFunction::ReLU => x.max(0.0),
            ActivationFunction::Identity => x,
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::LeakyReLU { alpha } => if x > 0.0 { x } else { alpha * x },
            ActivationFunction::Elu { alpha } => if x > 0.0 { x } else { alpha * x.exp_m1() },
        }
    }

    /// Derivative with respect to the pre-activation value `z`.
    pub fn derivative(&self, z: f64) -> f64 {
        match *self {
            ActivationFunction::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
            ActivationFunction::ReLU => if z > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::Identity => 1.0,
            ActivationFunction::Tanh => 1.0 - z.tanh().powi(2),
            ActivationFunction::LeakyReLU { alpha } => if z > 0.0 { 1.0 } else { alpha },
            ActivationFunction::Elu { alpha } => if z > 0.0 { 1.0 } else { alpha * z.exp() },
        }
    }

    /// Whether He initialization suits this activation better than Xavier.
    pub fn is_rectifier(&self) -> bool {
        matches!(self, ActivationFunction::ReLU | ActivationFunction::LeakyReLU { .. } | ActivationFunction::Elu { .. })
    }

    pub fn apply(&self, z: &Matrix) -> Matrix {
        match self {
            ActivationFunction::Identity => z.clone(),
            _ => z.map(|x| self.function(x)),
        }
    }

    /// `delta ⊙ σ'(z)`, the error signal at the pre-activation.
    pub fn backprop(&self, delta: &Matrix, z: &Matrix) -> Matrix {
        match self {
            ActivationFunction::Identity => delta.clone(),
            _ => delta.hadamard(&z.map(|x| self.derivative(x))),
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
