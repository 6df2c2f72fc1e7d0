use std::path::Path;

use image::{Rgb, RgbImage};
use tracing::debug;

use crate::error::{Result, SegError};
use crate::math::{LabelBatch, Tensor4};

/// One column of every grid cell.
#[derive(Debug, Clone, Copy)]
pub enum GridPanel<'a> {
    /// Images with values in [-1, 1]; one channel is shown as grey.
    Image(&'a Tensor4),
    /// Class labels; 0 is black and 1 (or more) is white.
    Labels(&'a LabelBatch),
}

impl GridPanel<'_> {
    fn dims(&self) -> (usize, usize, usize) {
        match self {
            GridPanel::Image(t) => (t.n(), t.h(), t.w()),
            GridPanel::Labels(l) => (l.n, l.h, l.w),
        }
    }

    fn pixel(&self, s: usize, y: usize, x: usize) -> [u8; 3] {
        let to_u8 = |v: f64| v.round_ties_even().clamp(0.0, 255.0) as u8;
        match self {
            GridPanel::Image(t) => {
                let channel = |c: usize| to_u8((t.get(s, c.min(t.c() - 1), y, x) + 1.0) * 127.5);
                [channel(0), channel(1), channel(2)]
            }
            GridPanel::Labels(l) => {
                let v = to_u8(l.get(s, y, x) as f64 * 255.0);
                [v, v, v]
            }
        }
    }
}

/// Writes a `gw × gh` grid of cells, each showing the panels of one sample
/// side by side. Samples past `gw * gh` are dropped; missing ones stay black.
pub fn save_seg_grid(panels: &[GridPanel<'_>], path: &Path, grid: (usize, usize)) -> Result<()> {
    let (gw, gh) = grid;
    let first = panels.first().ok_or_else(|| SegError::shape("grid needs at least one panel"))?;
    let (_, h, w) = first.dims();
    if let Some(odd) = panels.iter().find(|p| (p.dims().1, p.dims().2) != (h, w)) {
        return Err(SegError::shape(format!(
            "grid panels must share one size: {h}x{w} vs {}x{}",
            odd.dims().1,
            odd.dims().2
        )));
    }
    let samples = panels.iter().map(|p| p.dims().0).min().unwrap_or(0).min(gw * gh);

    let cell_w = w * panels.len();
    let mut canvas = RgbImage::new((gw * cell_w) as u32, (gh * h) as u32);
    for s in 0..samples {
        let (row, col) = (s / gw, s % gw);
        for (p, panel) in panels.iter().enumerate() {
            let left = col * cell_w + p * w;
            for y in 0..h {
                for x in 0..w {
                    canvas.put_pixel((left + x) as u32, (row * h + y) as u32, Rgb(panel.pixel(s, y, x)));
                }
            }
        }
    }
    canvas.save(path)?;
    debug!(path = %path.display(), samples, "saved segmentation grid");
    Ok(())
}
