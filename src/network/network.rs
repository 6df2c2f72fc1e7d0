use rand::Rng;
use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::activation::activation::ActivationFunction;
use crate::checkpoint::Stateful;
use crate::error::{Result, SegError};
use crate::layers::dense::Layer;
use crate::math::{Matrix, Tensor4};
use crate::network::model::{Mode, SegmentationModel};
use crate::network::spec::ModelSpec;

/// Per-pixel MLP segmentation network.
///
/// Each pixel becomes one row holding its zero-padded neighbourhood, so a
/// batch of `N` images of `H×W` is a single `(N·H·W, features)` matrix pushed
/// through the dense layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchNet {
    pub spec: ModelSpec,
    pub layers: Vec<Layer>,
    #[serde(skip)]
    mode: Mode,
}

impl PatchNet {
    pub fn new<R: Rng>(spec: ModelSpec, rng: &mut R) -> Result<PatchNet> {
        spec.validate()?;
        let mut layers = Vec::with_capacity(spec.hidden.len() + 1);
        let mut input_size = spec.feature_len();
        for hidden in &spec.hidden {
            layers.push(Layer::new(hidden.size, input_size, hidden.activation.clone(), rng));
            input_size = hidden.size;
        }
        layers.push(Layer::new(spec.num_classes, input_size, ActivationFunction::Identity, rng));
        Ok(PatchNet { spec, layers, mode: Mode::Train })
    }

    /// Gathers the neighbourhood of every pixel into one feature row.
    fn features(&self, images: &Tensor4) -> Result<Matrix> {
        let [n, c, h, w] = images.shape();
        if c != self.spec.in_channels {
            return Err(SegError::shape(format!(
                "model expects {} input channels, got {}",
                self.spec.in_channels, c
            )));
        }
        let r = self.spec.patch_radius as isize;
        let d = 2 * self.spec.patch_radius + 1;
        let cols = self.spec.feature_len();
        let mut out = Matrix::zeros(n * h * w, cols);
        for s in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let row = (s * h + y) * w + x;
                    for ch in 0..c {
                        for dy in -r..=r {
                            let sy = y as isize + dy;
                            if sy < 0 || sy >= h as isize {
                                continue;
                            }
                            for dx in -r..=r {
                                let sx = x as isize + dx;
                                if sx < 0 || sx >= w as isize {
                                    continue;
                                }
                                let col = ch * d * d + (dy + r) as usize * d + (dx + r) as usize;
                                out.set(row, col, images.get(s, ch, sy as usize, sx as usize));
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

impl SegmentationModel for PatchNet {
    fn num_classes(&self) -> usize {
        self.spec.num_classes
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode == Mode::Eval {
            for layer in &mut self.layers {
                layer.clear_cache();
            }
        }
    }

    fn forward(&mut self, images: &Tensor4) -> Result<Tensor4> {
        let [n, _, h, w] = images.shape();
        let keep_cache = self.mode == Mode::Train;
        let mut current = self.features(images)?;
        for layer in &mut self.layers {
            current = layer.feed_from(current, keep_cache);
        }

        let k = self.spec.num_classes;
        let mut logits = Tensor4::zeros([n, k, h, w]);
        for s in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let row = current.row((s * h + y) * w + x);
                    for (class, &v) in row.iter().enumerate() {
                        logits.set(s, class, y, x, v);
                    }
                }
            }
        }
        Ok(logits)
    }

    fn backward(&mut self, grad_logits: &Tensor4) -> Result<Vec<Matrix>> {
        if self.mode != Mode::Train {
            return Err(SegError::state("backward called on a model in eval mode"));
        }
        let [n, k, h, w] = grad_logits.shape();
        let mut delta = Matrix::zeros(n * h * w, k);
        for s in 0..n {
            for class in 0..k {
                for y in 0..h {
                    for x in 0..w {
                        delta.set((s * h + y) * w + x, class, grad_logits.get(s, class, y, x));
                    }
                }
            }
        }

        let mut grads = Vec::with_capacity(self.layers.len() * 2);
        for layer in self.layers.iter().rev() {
            let (w_grad, b_grad, input_delta) = layer
                .compute_gradients(&delta)
                .ok_or_else(|| SegError::state("backward called without a training forward pass"))?;
            // Collected back to front; reversed below.
            grads.push(b_grad);
            grads.push(w_grad);
            delta = input_delta;
        }
        grads.reverse();
        Ok(grads)
    }

    fn parameters_mut(&mut self) -> Vec<&mut Matrix> {
        self.layers.iter_mut().flat_map(|layer| layer.params_mut()).collect()
    }
}

impl Stateful for PatchNet {
    fn state_dict(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_state_dict(&mut self, state: Value) -> Result<()> {
        let restored: PatchNet = serde_json::from_value(state)?;
        if restored.spec != self.spec {
            return Err(SegError::state("snapshot model architecture differs from the configured one"));
        }
        if restored.layers.len() != self.layers.len() {
            return Err(SegError::state("snapshot layer count differs from the configured model"));
        }
        for (layer, saved) in self.layers.iter().zip(&restored.layers) {
            let shapes_match = layer.weights.rows == saved.weights.rows
                && layer.weights.cols == saved.weights.cols
                && saved.weights.data.len() == saved.weights.rows * saved.weights.cols
                && saved.biases.data.len() == layer.biases.data.len();
            if !shapes_match {
                return Err(SegError::state("snapshot layer shapes differ from the configured model"));
            }
        }
        self.layers = restored.layers;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::CrossEntropyLoss;
    use crate::math::LabelBatch;
    use crate::network::model::ModeGuard;
    use rand::{rngs::StdRng, SeedableRng};

    fn tiny_net() -> PatchNet {
        let spec = ModelSpec { in_channels: 1, ..ModelSpec::default() };
        PatchNet::new(spec, &mut StdRng::seed_from_u64(3)).unwrap()
    }

    #[test]
    fn forward_produces_class_planes() {
        let mut net = tiny_net();
        let logits = net.forward(&Tensor4::zeros([2, 1, 4, 5])).unwrap();
        assert_eq!(logits.shape(), [2, 2, 4, 5]);
    }

    #[test]
    fn eval_mode_refuses_backward_and_guard_restores_mode() {
        let mut net = tiny_net();
        {
            let mut guarded = ModeGuard::new(&mut net, Mode::Eval);
            let logits = guarded.forward(&Tensor4::zeros([1, 1, 2, 2])).unwrap();
            assert!(guarded.backward(&logits).is_err());
        }
        assert_eq!(net.mode(), Mode::Train);
    }

    #[test]
    fn backward_gradient_matches_finite_difference() {
        let mut net = tiny_net();
        let images = Tensor4::from_vec([1, 1, 2, 2], vec![0.5, -0.25, 1.0, -1.0]).unwrap();
        let targets = LabelBatch::from_vec(1, 2, 2, vec![1, 0, 1, 0]).unwrap();

        let logits = net.forward(&images).unwrap();
        let (base, grad) = CrossEntropyLoss::loss_and_grad(&logits, &targets).unwrap();
        let grads = net.backward(&grad).unwrap();
        let analytic = grads.last().unwrap().data[0];

        let eps = 1e-6;
        let last = net.layers.len() - 1;
        net.layers[last].biases.data[0] += eps;
        let logits = net.forward(&images).unwrap();
        let (moved, _) = CrossEntropyLoss::loss_and_grad(&logits, &targets).unwrap();
        assert!(((moved - base) / eps - analytic).abs() < 1e-4);
    }

    #[test]
    fn state_dict_restores_identical_logits() {
        let mut a = tiny_net();
        let mut b = PatchNet::new(a.spec.clone(), &mut StdRng::seed_from_u64(99)).unwrap();
        let images = Tensor4::from_vec([1, 1, 2, 2], vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        b.load_state_dict(a.state_dict().unwrap()).unwrap();
        assert_eq!(a.forward(&images).unwrap(), b.forward(&images).unwrap());
    }
}
