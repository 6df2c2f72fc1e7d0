use serde::{Serialize, Deserialize};

use crate::error::Result;
use crate::math::matrix::Matrix;
use crate::optim::sgd::check_alignment;

/// Adam with bias-corrected first and second moment estimates.
///
/// The moment buffers are created lazily on the first step so the optimizer
/// can be built before the parameter shapes are known. They are part of the
/// serialized state, which makes a resumed run continue bit-for-bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub step_count: u64,
    m: Vec<Matrix>,
    v: Vec<Matrix>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Adam {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step_count: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn step(&mut self, params: Vec<&mut Matrix>, grads: &[Matrix]) -> Result<()> {
        check_alignment(&params, grads)?;
        if self.m.len() != grads.len() {
            self.m = grads.iter().map(|g| Matrix::zeros(g.rows, g.cols)).collect();
            self.v = grads.iter().map(|g| Matrix::zeros(g.rows, g.cols)).collect();
        }

        self.step_count += 1;
        let t = self.step_count as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);

        for (i, (param, grad)) in params.into_iter().zip(grads).enumerate() {
            let m = &mut self.m[i].data;
            let v = &mut self.v[i].data;
            for (j, &g) in grad.data.iter().enumerate() {
                m[j] = self.beta1 * m[j] + (1.0 - self.beta1) * g;
                v[j] = self.beta2 * v[j] + (1.0 - self.beta2) * g * g;
                let m_hat = m[j] / bias1;
                let v_hat = v[j] / bias2;
                param.data[j] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        // With bias correction the first update is lr * sign(g).
        let mut w = Matrix::from_data(vec![vec![0.0, 0.0]]);
        let g = Matrix::from_data(vec![vec![3.0, -0.2]]);
        let mut adam = Adam::new(0.01);
        adam.step(vec![&mut w], &[g]).unwrap();
        assert!((w.data[0] + 0.01).abs() < 1e-6);
        assert!((w.data[1] - 0.01).abs() < 1e-6);
        assert_eq!(adam.step_count, 1);
    }
}
