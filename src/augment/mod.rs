pub mod pipe;

pub use pipe::{AugPolicy, AugmentPipe, SampleParams};

use serde::{Deserialize, Serialize};

use crate::data::Batch;
use crate::error::Result;
use crate::math::Tensor4;

/// Random parameters drawn for one call on an image batch, one set per sample.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AugmentParams {
    pub samples: Vec<SampleParams>,
}

/// A transform applied to an image batch and then, with the same
/// parameters, to its mask so geometry stays aligned.
pub trait Augment {
    /// With `params == None` fresh parameters are drawn. Masks only receive
    /// the geometric part of the transform.
    fn apply(&mut self, tensor: &Tensor4, params: Option<&AugmentParams>, is_mask: bool) -> Result<(Tensor4, AugmentParams)>;
}

/// Augments images and masks of a batch with shared parameters.
///
/// Masks are expanded to one-hot planes before the transform and collapsed
/// back by arg-max, so interpolated label borders stay hard.
pub fn augment_batch(op: Option<&mut dyn Augment>, batch: Batch, num_classes: usize) -> Result<Batch> {
    let Some(op) = op else {
        return Ok(batch);
    };
    let (images, params) = op.apply(&batch.images, None, false)?;
    let one_hot = batch.masks.one_hot(num_classes);
    let (planes, _) = op.apply(&one_hot, Some(&params), true)?;
    Batch::new(images, planes.argmax_classes())
}
