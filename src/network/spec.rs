use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Result, SegError};

/// Describes one hidden layer of a `PatchNet`.
///
/// Fields:
/// - `size`       — number of units in this layer
/// - `activation` — activation function applied after the affine transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub size: usize,
    pub activation: ActivationFunction,
}

/// A fully serializable description of the segmentation network.
///
/// Every pixel is classified from the `(2r+1)²` neighbourhood of
/// `in_channels` input values around it (zero padded at the border), pushed
/// through `hidden` and a final linear layer producing `num_classes` logits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub in_channels: usize,
    pub num_classes: usize,
    pub patch_radius: usize,
    pub hidden: Vec<LayerSpec>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec {
            in_channels: 3,
            num_classes: 2,
            patch_radius: 1,
            hidden: vec![
                LayerSpec { size: 16, activation: ActivationFunction::ReLU },
                LayerSpec { size: 16, activation: ActivationFunction::ReLU },
            ],
        }
    }
}

impl ModelSpec {
    /// Length of the per-pixel feature vector.
    pub fn feature_len(&self) -> usize {
        let d = 2 * self.patch_radius + 1;
        self.in_channels * d * d
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 {
            return Err(SegError::config("model needs at least one input channel"));
        }
        if self.num_classes < 2 {
            return Err(SegError::config("model needs at least two classes"));
        }
        if self.num_classes > u8::MAX as usize + 1 {
            return Err(SegError::config("labels are stored as u8; at most 256 classes"));
        }
        if self.hidden.iter().any(|l| l.size == 0) {
            return Err(SegError::config("hidden layers must have at least one unit"));
        }
        Ok(())
    }

    /// Serializes the spec to a pretty-printed JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a `ModelSpec` from a JSON file.
    pub fn load_json(path: &Path) -> Result<ModelSpec> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
