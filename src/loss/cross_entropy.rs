use crate::error::{Result, SegError};
use crate::math::tensor::{LabelBatch, Tensor4};

/// Pixel-wise categorical cross-entropy on raw class logits.
///
/// Softmax is folded into the loss, so the gradient with respect to the
/// logits simplifies to `softmax(z) - onehot(target)`, averaged over every
/// pixel of the batch.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// Returns the mean loss and ∂L/∂logits for `[N, K, H, W]` logits and
    /// `[N, H, W]` targets.
    pub fn loss_and_grad(logits: &Tensor4, targets: &LabelBatch) -> Result<(f64, Tensor4)> {
        let [n, k, h, w] = logits.shape();
        if (targets.n, targets.h, targets.w) != (n, h, w) {
            return Err(SegError::shape(format!(
                "logits {:?} do not match targets [{}, {}, {}]",
                logits.shape(),
                targets.n,
                targets.h,
                targets.w
            )));
        }
        let pixels = (n * h * w).max(1) as f64;
        let mut grad = Tensor4::zeros(logits.shape());
        let mut total = 0.0;
        let mut probs = vec![0.0; k];

        for s in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let target = targets.get(s, y, x) as usize;
                    if target >= k {
                        return Err(SegError::shape(format!(
                            "label {} out of range for {} classes",
                            target, k
                        )));
                    }
                    // Log-sum-exp with max shift for stability.
                    let max = (0..k).map(|c| logits.get(s, c, y, x)).fold(f64::NEG_INFINITY, f64::max);
                    let mut sum = 0.0;
                    for (c, p) in probs.iter_mut().enumerate() {
                        *p = (logits.get(s, c, y, x) - max).exp();
                        sum += *p;
                    }
                    total += sum.ln() + max - logits.get(s, target, y, x);
                    for (c, p) in probs.iter().enumerate() {
                        let onehot = if c == target { 1.0 } else { 0.0 };
                        grad.set(s, c, y, x, (p / sum - onehot) / pixels);
                    }
                }
            }
        }
        Ok((total / pixels, grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_logits_give_log_k() {
        let logits = Tensor4::zeros([1, 2, 2, 2]);
        let targets = LabelBatch::from_vec(1, 2, 2, vec![0, 1, 1, 0]).unwrap();
        let (loss, grad) = CrossEntropyLoss::loss_and_grad(&logits, &targets).unwrap();
        assert!((loss - 2f64.ln()).abs() < 1e-12);
        // (0.5 - 1) / 4 for the target class, 0.5 / 4 for the other.
        assert!((grad.get(0, 0, 0, 0) + 0.125).abs() < 1e-12);
        assert!((grad.get(0, 1, 0, 0) - 0.125).abs() < 1e-12);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let logits = Tensor4::from_vec([1, 2, 1, 1], vec![0.3, -1.2]).unwrap();
        let targets = LabelBatch::from_vec(1, 1, 1, vec![1]).unwrap();
        let (base, grad) = CrossEntropyLoss::loss_and_grad(&logits, &targets).unwrap();
        let mut bumped = logits.clone();
        bumped.data[1] += 1e-6;
        let (moved, _) = CrossEntropyLoss::loss_and_grad(&bumped, &targets).unwrap();
        assert!(((moved - base) / 1e-6 - grad.data[1]).abs() < 1e-5);
    }
}
