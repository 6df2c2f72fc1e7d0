use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::{math::matrix::Matrix, activation::activation::ActivationFunction};

/// Values remembered from the last training-mode forward pass.
#[derive(Debug, Clone)]
struct LayerCache {
    input: Matrix,
    pre_activation: Matrix, // z = xW + b, needed for the activation derivative
}

/// Fully connected layer applied row-wise: each row of the input is one pixel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub size: usize,
    /// Shape (input_size, size).
    pub weights: Matrix,
    /// Shape (1, size).
    pub biases: Matrix,
    pub activator: ActivationFunction,
    #[serde(skip)]
    cache: Option<LayerCache>,
}

impl Layer {
    pub fn new<R: Rng>(size: usize, input_size: usize, activation: ActivationFunction, rng: &mut R) -> Layer {
        let weights = if activation.is_rectifier() {
            Matrix::he(input_size, size, rng)
        } else {
            Matrix::xavier(input_size, size, rng)
        };
        Layer {
            size,
            weights,
            biases: Matrix::zeros(1, size),
            activator: activation,
            cache: None,
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.rows
    }

    /// Forward pass over a (rows, input_size) matrix. With `keep_cache` the
    /// input and pre-activation are retained for `compute_gradients`.
    pub fn feed_from(&mut self, input: Matrix, keep_cache: bool) -> Matrix {
        let mut z = input.matmul(&self.weights);
        z.add_row_broadcast(&self.biases);
        let a = self.activator.apply(&z);
        self.cache = if keep_cache {
            Some(LayerCache { input, pre_activation: z })
        } else {
            None
        };
        a
    }

    /// Computes (weights_grad, biases_grad, input_delta) from ∂L/∂a for this
    /// layer. Returns `None` when no training-mode forward pass is cached.
    pub fn compute_gradients(&self, next_layer_delta: &Matrix) -> Option<(Matrix, Matrix, Matrix)> {
        let cache = self.cache.as_ref()?;
        let layer_delta = self.activator.backprop(next_layer_delta, &cache.pre_activation);

        let weights_grad = cache.input.t_matmul(&layer_delta);
        let biases_grad = layer_delta.column_sums();
        let input_delta = layer_delta.matmul(&self.weights.transpose());

        Some((weights_grad, biases_grad, input_delta))
    }

    /// Trainable parameters in optimizer order: weights, then biases.
    pub fn params_mut(&mut self) -> [&mut Matrix; 2] {
        [&mut self.weights, &mut self.biases]
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }
}
