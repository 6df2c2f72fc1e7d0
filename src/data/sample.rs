use crate::error::{Result, SegError};
use crate::math::{LabelBatch, Tensor4};

/// One decoded image with its label mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Planar `[C, H, W]` values in [-1, 1].
    pub image: Vec<f64>,
    /// `[H, W]` class labels.
    pub mask: Vec<u8>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Sample {
    pub fn new(image: Vec<f64>, mask: Vec<u8>, channels: usize, height: usize, width: usize) -> Result<Sample> {
        if image.len() != channels * height * width || mask.len() != height * width {
            return Err(SegError::shape(format!(
                "sample {}x{}x{} has {} image values and {} mask values",
                channels,
                height,
                width,
                image.len(),
                mask.len()
            )));
        }
        Ok(Sample { image, mask, channels, height, width })
    }
}

/// Images and masks sharing the sample count and spatial size.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Tensor4,
    pub masks: LabelBatch,
}

impl Batch {
    pub fn new(images: Tensor4, masks: LabelBatch) -> Result<Batch> {
        let [n, _, h, w] = images.shape();
        if (n, h, w) != (masks.n, masks.h, masks.w) {
            return Err(SegError::shape(format!(
                "images {:?} do not pair with masks [{}, {}, {}]",
                images.shape(),
                masks.n,
                masks.h,
                masks.w
            )));
        }
        Ok(Batch { images, masks })
    }

    /// Stacks samples along a new leading axis.
    pub fn collate(samples: &[Sample]) -> Result<Batch> {
        let first = samples
            .first()
            .ok_or_else(|| SegError::shape("cannot collate an empty batch"))?;
        let (c, h, w) = (first.channels, first.height, first.width);
        let mut images = Vec::with_capacity(samples.len() * c * h * w);
        let mut masks = Vec::with_capacity(samples.len() * h * w);
        for s in samples {
            if (s.channels, s.height, s.width) != (c, h, w) {
                return Err(SegError::shape(format!(
                    "cannot collate {}x{}x{} with {}x{}x{}",
                    c, h, w, s.channels, s.height, s.width
                )));
            }
            images.extend_from_slice(&s.image);
            masks.extend_from_slice(&s.mask);
        }
        let n = samples.len();
        Batch::new(Tensor4::from_vec([n, c, h, w], images)?, LabelBatch::from_vec(n, h, w, masks)?)
    }

    pub fn len(&self) -> usize {
        self.images.n()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
