use serde::{Serialize, Deserialize};

use crate::error::{Result, SegError};
use crate::math::matrix::Matrix;

/// Plain gradient descent: `p -= lr * g`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sgd {
    pub learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate }
    }

    /// Applies one update to every parameter given its gradient.
    pub fn step(&mut self, params: Vec<&mut Matrix>, grads: &[Matrix]) -> Result<()> {
        check_alignment(&params, grads)?;
        for (param, grad) in params.into_iter().zip(grads) {
            for (p, g) in param.data.iter_mut().zip(&grad.data) {
                *p -= self.learning_rate * g;
            }
        }
        Ok(())
    }
}

/// Gradients must line up one-to-one with parameters, shape for shape.
pub(crate) fn check_alignment(params: &[&mut Matrix], grads: &[Matrix]) -> Result<()> {
    if params.len() != grads.len() {
        return Err(SegError::shape(format!(
            "{} parameters but {} gradients",
            params.len(),
            grads.len()
        )));
    }
    for (i, (p, g)) in params.iter().zip(grads).enumerate() {
        if (p.rows, p.cols) != (g.rows, g.cols) {
            return Err(SegError::shape(format!(
                "gradient #{i} is {}x{}, parameter is {}x{}",
                g.rows, g.cols, p.rows, p.cols
            )));
        }
    }
    Ok(())
}
