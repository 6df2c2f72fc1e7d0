use std::ops::{Deref, DerefMut};

use serde::{Serialize, Deserialize};

use crate::checkpoint::Stateful;
use crate::error::Result;
use crate::math::{LabelBatch, Matrix, Tensor4};

/// Whether a model tracks what it needs for a backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// Contract the training loop and the metric engine need from a network.
///
/// `forward` maps `[N, C, H, W]` images to `[N, num_classes, H, W]` logits.
/// In `Mode::Eval` it must not retain gradient state, and `backward` fails.
/// `backward` returns gradients aligned with `parameters_mut`.
pub trait SegmentationModel: Stateful {
    fn num_classes(&self) -> usize;

    fn mode(&self) -> Mode;

    fn set_mode(&mut self, mode: Mode);

    fn forward(&mut self, images: &Tensor4) -> Result<Tensor4>;

    fn backward(&mut self, grad_logits: &Tensor4) -> Result<Vec<Matrix>>;

    fn parameters_mut(&mut self) -> Vec<&mut Matrix>;

    /// Hard labels in inference mode; the caller's mode is restored.
    fn predict(&mut self, images: &Tensor4) -> Result<LabelBatch> {
        let mut model = ModeGuard::new(self, Mode::Eval);
        Ok(model.forward(images)?.argmax_classes())
    }
}

/// Switches a model into `mode` for the guard's lifetime and restores the
/// previous mode on drop, including when the caller bails out with `?`.
pub struct ModeGuard<'a, M: SegmentationModel + ?Sized> {
    model: &'a mut M,
    previous: Mode,
}

impl<'a, M: SegmentationModel + ?Sized> ModeGuard<'a, M> {
    pub fn new(model: &'a mut M, mode: Mode) -> Self {
        let previous = model.mode();
        model.set_mode(mode);
        ModeGuard { model, previous }
    }
}

impl<M: SegmentationModel + ?Sized> Deref for ModeGuard<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.model
    }
}

impl<M: SegmentationModel + ?Sized> DerefMut for ModeGuard<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.model
    }
}

impl<M: SegmentationModel + ?Sized> Drop for ModeGuard<'_, M> {
    fn drop(&mut self) {
        self.model.set_mode(self.previous);
    }
}
