#![allow(dead_code)]

use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use serde_json::{json, Value};

use synseg::checkpoint::Stateful;
use synseg::data::Batch;
use synseg::math::{LabelBatch, Matrix, Tensor4};
use synseg::network::{Mode, SegmentationModel};
use synseg::Result;

pub fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

/// Square object of side `size / 2` whose corner depends on `seed`.
fn object_square(seed: usize, size: u32) -> (u32, u32, u32) {
    let side = size / 2;
    let span = size - side + 1;
    ((seed as u32 * 3) % span, (seed as u32 * 5) % span, side)
}

fn write_pair(image: &Path, mask: &Path, seed: usize, size: u32) {
    let (x0, y0, side) = object_square(seed, size);
    let inside = |x: u32, y: u32| x >= x0 && x < x0 + side && y >= y0 && y < y0 + side;
    let img = RgbImage::from_fn(size, size, |x, y| {
        if inside(x, y) {
            Rgb([230, 200, 40])
        } else {
            Rgb([20, 30, (10 * seed % 60) as u8])
        }
    });
    let msk = RgbImage::from_fn(size, size, |x, y| if inside(x, y) { Rgb([255; 3]) } else { Rgb([0; 3]) });
    img.save(image).unwrap();
    msk.save(mask).unwrap();
}

/// `img/NNNN.png` + `mask/NNNN.png` pairs under `root`.
pub fn write_synthetic(root: &Path, count: usize, size: u32) {
    fs::create_dir_all(root.join("img")).unwrap();
    fs::create_dir_all(root.join("mask")).unwrap();
    for i in 0..count {
        let name = format!("{i:04}.png");
        write_pair(&root.join("img").join(&name), &root.join("mask").join(&name), i, size);
    }
}

/// A processed dog-style dataset: key lists plus resized image/mask files.
pub fn write_dog_layout(root: &Path, train: usize, test: usize, size: u32) {
    for (split, list, count) in [("train", "data_tr_sel.txt", train), ("test", "data_te_sel.txt", test)] {
        let dir = root.join("data_mrcnn").join(split).join("resized");
        fs::create_dir_all(&dir).unwrap();
        let mut keys = String::new();
        for i in 0..count {
            let key = format!("dog_{split}_{i}");
            write_pair(
                &dir.join(format!("{key}_resized.png")),
                &dir.join(format!("{key}_maskresized.png")),
                i + 7,
                size,
            );
            keys.push_str(&key);
            keys.push('\n');
        }
        fs::write(root.join(list), keys).unwrap();
    }
}

/// Predicts class 1 wherever the first channel is positive.
#[derive(Debug, Default)]
pub struct ThresholdModel {
    pub mode: Mode,
    pub forward_modes: Vec<Mode>,
}

impl Stateful for ThresholdModel {
    fn state_dict(&self) -> Result<Value> {
        Ok(json!({}))
    }

    fn load_state_dict(&mut self, _state: Value) -> Result<()> {
        Ok(())
    }
}

impl SegmentationModel for ThresholdModel {
    fn num_classes(&self) -> usize {
        2
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn forward(&mut self, images: &Tensor4) -> Result<Tensor4> {
        self.forward_modes.push(self.mode);
        let [n, _, h, w] = images.shape();
        let mut logits = Tensor4::zeros([n, 2, h, w]);
        for s in 0..n {
            for y in 0..h {
                for x in 0..w {
                    logits.set(s, 1, y, x, images.get(s, 0, y, x));
                }
            }
        }
        Ok(logits)
    }

    fn backward(&mut self, _grad_logits: &Tensor4) -> Result<Vec<Matrix>> {
        Ok(Vec::new())
    }

    fn parameters_mut(&mut self) -> Vec<&mut Matrix> {
        Vec::new()
    }
}

/// Batch whose images encode `masks` exactly: +1 on foreground, -1 elsewhere.
pub fn batch_from_masks(masks: LabelBatch) -> Batch {
    let mut images = Tensor4::zeros([masks.n, 3, masks.h, masks.w]);
    for s in 0..masks.n {
        for y in 0..masks.h {
            for x in 0..masks.w {
                let v = if masks.get(s, y, x) == 1 { 1.0 } else { -1.0 };
                for c in 0..3 {
                    images.set(s, c, y, x, v);
                }
            }
        }
    }
    Batch::new(images, masks).unwrap()
}
