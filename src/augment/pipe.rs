use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::augment::{Augment, AugmentParams};
use crate::error::{Result, SegError};
use crate::math::{Matrix, Tensor4};

/// Named augmentation presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AugPolicy {
    /// Flips, quarter turns, scaling and translation.
    Geom,
    /// Brightness, contrast and saturation.
    Color,
    /// Both of the above.
    Gc,
}

impl AugPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            AugPolicy::Geom => "geom",
            AugPolicy::Color => "color",
            AugPolicy::Gc => "gc",
        }
    }
}

impl fmt::Display for AugPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AugPolicy {
    type Err = SegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "geom" => Ok(AugPolicy::Geom),
            "color" => Ok(AugPolicy::Color),
            "gc" => Ok(AugPolicy::Gc),
            other => Err(SegError::UnknownAugment(other.to_string())),
        }
    }
}

/// Transform drawn for a single sample. Identity values mean "not applied".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleParams {
    pub xflip: bool,
    /// Counter-clockwise quarter turns, 0..4.
    pub rot90: u8,
    pub scale: f64,
    /// Translation as a fraction of width / height.
    pub tx: f64,
    pub ty: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
}

impl Default for SampleParams {
    fn default() -> Self {
        SampleParams {
            xflip: false,
            rot90: 0,
            scale: 1.0,
            tx: 0.0,
            ty: 0.0,
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
        }
    }
}

/// Per-sample random augmentation with independent probabilities per op.
pub struct AugmentPipe {
    pub xflip: f64,
    pub rotate90: f64,
    pub scale: f64,
    pub translate: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub scale_std: f64,
    pub translate_std: f64,
    pub brightness_std: f64,
    pub contrast_std: f64,
    pub saturation_std: f64,
    rng: StdRng,
}

impl AugmentPipe {
    pub fn new(policy: AugPolicy, seed: u64) -> AugmentPipe {
        let geom = if matches!(policy, AugPolicy::Geom | AugPolicy::Gc) { 0.5 } else { 0.0 };
        let color = if matches!(policy, AugPolicy::Color | AugPolicy::Gc) { 0.5 } else { 0.0 };
        AugmentPipe {
            xflip: geom,
            rotate90: geom,
            scale: geom,
            translate: geom,
            brightness: color,
            contrast: color,
            saturation: color,
            scale_std: 0.2,
            translate_std: 0.125,
            brightness_std: 0.2,
            contrast_std: 0.5,
            saturation_std: 1.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn draw(&mut self) -> SampleParams {
        let mut p = SampleParams::default();
        if self.rng.gen::<f64>() < self.xflip {
            p.xflip = true;
        }
        if self.rng.gen::<f64>() < self.rotate90 {
            p.rot90 = self.rng.gen_range(0..4);
        }
        if self.rng.gen::<f64>() < self.scale {
            p.scale = (Matrix::sample_standard_normal(&mut self.rng) * self.scale_std).exp2();
        }
        if self.rng.gen::<f64>() < self.translate {
            p.tx = Matrix::sample_standard_normal(&mut self.rng) * self.translate_std;
            p.ty = Matrix::sample_standard_normal(&mut self.rng) * self.translate_std;
        }
        if self.rng.gen::<f64>() < self.brightness {
            p.brightness = Matrix::sample_standard_normal(&mut self.rng) * self.brightness_std;
        }
        if self.rng.gen::<f64>() < self.contrast {
            p.contrast = (Matrix::sample_standard_normal(&mut self.rng) * self.contrast_std).exp2();
        }
        if self.rng.gen::<f64>() < self.saturation {
            p.saturation = (Matrix::sample_standard_normal(&mut self.rng) * self.saturation_std).exp2();
        }
        p
    }
}

impl Augment for AugmentPipe {
    fn apply(&mut self, tensor: &Tensor4, params: Option<&AugmentParams>, is_mask: bool) -> Result<(Tensor4, AugmentParams)> {
        let params = match params {
            Some(p) => p.clone(),
            None => AugmentParams { samples: (0..tensor.n()).map(|_| self.draw()).collect() },
        };
        if params.samples.len() != tensor.n() {
            return Err(SegError::shape(format!(
                "{} augmentation parameter sets for {} samples",
                params.samples.len(),
                tensor.n()
            )));
        }

        let mut out = tensor.clone();
        for (s, p) in params.samples.iter().enumerate() {
            if !is_mask {
                adjust_color(&mut out, s, p);
            }
            warp(&mut out, s, p);
        }
        Ok((out, params))
    }
}

fn adjust_color(t: &mut Tensor4, s: usize, p: &SampleParams) {
    let [_, c, h, w] = t.shape();
    for y in 0..h {
        for x in 0..w {
            let luma = (0..c).map(|ch| t.get(s, ch, y, x)).sum::<f64>() / c as f64;
            for ch in 0..c {
                let v = t.get(s, ch, y, x);
                let v = luma + (v - luma) * p.saturation;
                t.set(s, ch, y, x, v * p.contrast + p.brightness);
            }
        }
    }
}

fn is_identity_geometry(p: &SampleParams) -> bool {
    !p.xflip && p.rot90 % 4 == 0 && p.scale == 1.0 && p.tx == 0.0 && p.ty == 0.0
}

/// Resamples sample `s` of `t` in place through the inverse of the geometric
/// transform with bilinear interpolation and zero padding.
fn warp(t: &mut Tensor4, s: usize, p: &SampleParams) {
    if is_identity_geometry(p) {
        return;
    }
    let [_, c, h, w] = t.shape();
    let source = t.sample(s).to_vec();
    let plane = Plane { data: &source, h, w };
    let (cx, cy) = ((w as f64 - 1.0) / 2.0, (h as f64 - 1.0) / 2.0);

    for y in 0..h {
        for x in 0..w {
            let mut u = (x as f64 - cx - p.tx * w as f64) / p.scale;
            let mut v = (y as f64 - cy - p.ty * h as f64) / p.scale;
            for _ in 0..p.rot90 % 4 {
                (u, v) = (v, -u);
            }
            if p.xflip {
                u = -u;
            }
            for ch in 0..c {
                t.set(s, ch, y, x, plane.bilinear(ch, u + cx, v + cy));
            }
        }
    }
}

/// Read-only `[C, H, W]` view of one sample.
struct Plane<'a> {
    data: &'a [f64],
    h: usize,
    w: usize,
}

impl Plane<'_> {
    fn at(&self, ch: usize, x: f64, y: f64) -> f64 {
        if x < 0.0 || y < 0.0 || x >= self.w as f64 || y >= self.h as f64 {
            return 0.0;
        }
        self.data[(ch * self.h + y as usize) * self.w + x as usize]
    }

    fn bilinear(&self, ch: usize, x: f64, y: f64) -> f64 {
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        self.at(ch, x0, y0) * (1.0 - fx) * (1.0 - fy)
            + self.at(ch, x0 + 1.0, y0) * fx * (1.0 - fy)
            + self.at(ch, x0, y0 + 1.0) * (1.0 - fx) * fy
            + self.at(ch, x0 + 1.0, y0 + 1.0) * fx * fy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::augment_batch;
    use crate::data::Batch;
    use crate::math::LabelBatch;

    fn ramp(n: usize, c: usize, h: usize, w: usize) -> Tensor4 {
        let len = n * c * h * w;
        Tensor4::from_vec([n, c, h, w], (0..len).map(|i| i as f64 / len as f64).collect()).unwrap()
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert_eq!("gc".parse::<AugPolicy>().unwrap(), AugPolicy::Gc);
        assert!(matches!("blur".parse::<AugPolicy>(), Err(SegError::UnknownAugment(_))));
    }

    #[test]
    fn xflip_mirrors_columns() {
        let mut pipe = AugmentPipe::new(AugPolicy::Geom, 0);
        let t = ramp(1, 1, 2, 3);
        let params = AugmentParams { samples: vec![SampleParams { xflip: true, ..SampleParams::default() }] };
        let (out, _) = pipe.apply(&t, Some(&params), true).unwrap();
        for y in 0..2 {
            for x in 0..3 {
                assert!((out.get(0, 0, y, x) - t.get(0, 0, y, 2 - x)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn four_quarter_turns_are_identity_and_one_is_not() {
        let mut pipe = AugmentPipe::new(AugPolicy::Geom, 0);
        let t = ramp(1, 1, 3, 3);
        let turn = |k| AugmentParams { samples: vec![SampleParams { rot90: k, ..SampleParams::default() }] };
        let (full, _) = pipe.apply(&t, Some(&turn(4)), true).unwrap();
        assert_eq!(full, t);
        let (quarter, _) = pipe.apply(&t, Some(&turn(1)), true).unwrap();
        assert_ne!(quarter, t);
        assert!((quarter.get(0, 0, 1, 1) - t.get(0, 0, 1, 1)).abs() < 1e-12);
    }

    #[test]
    fn color_ops_leave_masks_alone() {
        let mut pipe = AugmentPipe::new(AugPolicy::Color, 3);
        let t = ramp(4, 2, 2, 2);
        let (_, params) = pipe.apply(&ramp(4, 3, 2, 2), None, false).unwrap();
        let (mask_out, _) = pipe.apply(&t, Some(&params), true).unwrap();
        assert_eq!(mask_out, t);
    }

    #[test]
    fn augmented_masks_stay_binary_and_aligned() {
        let mut pipe = AugmentPipe::new(AugPolicy::Gc, 11);
        let images = ramp(6, 3, 8, 8);
        let masks = LabelBatch::from_vec(6, 8, 8, (0..384).map(|i| ((i / 4) % 2) as u8).collect()).unwrap();
        let batch = Batch::new(images, masks).unwrap();
        let out = augment_batch(Some(&mut pipe), batch, 2).unwrap();
        assert_eq!(out.images.shape(), [6, 3, 8, 8]);
        assert!(out.masks.data.iter().all(|&v| v <= 1));
    }
}
