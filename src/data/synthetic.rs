use std::fs;
use std::path::{Path, PathBuf};

use crate::data::dataset::SegDataset;
use crate::data::image_io::{load_mask, load_rgb, Framing};
use crate::data::sample::Sample;
use crate::error::{Result, SegError};

/// Generated image/mask pairs stored as `img/*.png` and `mask/<same name>`.
#[derive(Debug, Clone)]
pub struct SynSegDataset {
    images: Vec<PathBuf>,
    masks: Vec<PathBuf>,
    framing: Framing,
}

impl SynSegDataset {
    /// Sorted image files of a synthetic data directory.
    pub fn list_images(root: &Path) -> Result<Vec<PathBuf>> {
        let img_dir = root.join("img");
        if !img_dir.is_dir() || !root.join("mask").is_dir() {
            return Err(SegError::config(format!(
                "{} must contain img/ and mask/ directories",
                root.display()
            )));
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&img_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Opens the samples at `indices` of the sorted file list.
    pub fn open(root: &Path, indices: impl IntoIterator<Item = usize>, scale: u32, crop_ratio: f64) -> Result<SynSegDataset> {
        if !(crop_ratio > 0.0 && crop_ratio <= 1.0) {
            return Err(SegError::config(format!("crop ratio must be in (0, 1], got {crop_ratio}")));
        }
        let all = Self::list_images(root)?;
        let mut images = Vec::new();
        for i in indices {
            let path = all
                .get(i)
                .ok_or_else(|| SegError::config(format!("sample index {i} out of range ({} files)", all.len())))?;
            images.push(path.clone());
        }
        let masks = images
            .iter()
            .map(|p| root.join("mask").join(p.file_name().unwrap_or_default()))
            .collect();
        let framing = if crop_ratio == 1.0 {
            Framing::Resize(scale)
        } else {
            Framing::CenterCropResize { crop: (scale as f64 * crop_ratio) as u32, size: scale }
        };
        Ok(SynSegDataset { images, masks, framing })
    }
}

impl SegDataset for SynSegDataset {
    fn len(&self) -> usize {
        self.images.len()
    }

    fn load(&self, index: usize) -> Result<Sample> {
        let (image_path, mask_path) = match (self.images.get(index), self.masks.get(index)) {
            (Some(i), Some(m)) => (i, m),
            _ => return Err(SegError::decode(index, "index out of range")),
        };
        let (image, h, w) = load_rgb(image_path, self.framing).map_err(|e| SegError::decode(index, e))?;
        let (mask, mh, mw) = load_mask(mask_path, self.framing).map_err(|e| SegError::decode(index, e))?;
        if (mh, mw) != (h, w) {
            return Err(SegError::decode(index, format!("mask is {mh}x{mw}, image is {h}x{w}")));
        }
        Sample::new(image, mask, 3, h, w)
    }
}
