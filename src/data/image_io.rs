use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::Result;

/// Axis-aligned crop in source pixels: `[x1, y1, x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropBox {
    /// Centered `side × side` window, clamped to the image.
    pub fn centered(width: u32, height: u32, side: u32) -> CropBox {
        let side_w = side.min(width);
        let side_h = side.min(height);
        let left = ((width - side_w) as f64 / 2.0).round() as u32;
        let top = ((height - side_h) as f64 / 2.0).round() as u32;
        CropBox { x1: left, y1: top, x2: left + side_w, y2: top + side_h }
    }

    /// Square of half-side `0.75 * max(bw, bh)` around a bounding box center.
    pub fn around_bbox(width: u32, height: u32, bbox: [i64; 4]) -> CropBox {
        let [bx, by, bw, bh] = bbox;
        let r = (bw.max(bh) as f64 * 0.75) as i64;
        let cx = (2 * bx + bw) / 2;
        let cy = (2 * by + bh) / 2;
        let clamp = |v: i64, hi: u32| v.clamp(0, hi as i64) as u32;
        CropBox {
            x1: clamp(cx - r, width),
            y1: clamp(cy - r, height),
            x2: clamp(cx + r, width),
            y2: clamp(cy + r, height),
        }
    }

    fn apply(&self, img: &DynamicImage) -> DynamicImage {
        let w = self.x2.saturating_sub(self.x1).max(1);
        let h = self.y2.saturating_sub(self.y1).max(1);
        img.crop_imm(self.x1, self.y1, w, h)
    }
}

/// How a decoded file is brought to the network resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Framing {
    /// Resize straight to `size × size`.
    Resize(u32),
    /// Take a centered square of `crop` pixels first, then resize.
    CenterCropResize { crop: u32, size: u32 },
    /// Crop an explicit box first, then resize.
    BoxResize(CropBox, u32),
}

fn frame(img: DynamicImage, framing: Framing) -> DynamicImage {
    let (cropped, size) = match framing {
        Framing::Resize(size) => (img, size),
        Framing::CenterCropResize { crop, size } => {
            let boxed = CropBox::centered(img.width(), img.height(), crop);
            (boxed.apply(&img), size)
        }
        Framing::BoxResize(boxed, size) => (boxed.apply(&img), size),
    };
    if cropped.width() == size && cropped.height() == size {
        cropped
    } else {
        cropped.resize_exact(size, size, FilterType::Triangle)
    }
}

/// Decodes an image into planar RGB `f64`s normalized to [-1, 1].
///
/// Returns `(data, height, width)` with `data.len() == 3 * height * width`.
pub fn load_rgb(path: &Path, framing: Framing) -> Result<(Vec<f64>, usize, usize)> {
    let img = frame(image::open(path)?, framing);
    let rgb = img.to_rgb8();
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    let mut data = vec![0.0; 3 * h * w];
    for (x, y, px) in rgb.enumerate_pixels() {
        for c in 0..3 {
            data[(c * h + y as usize) * w + x as usize] = px.0[c] as f64 / 127.5 - 1.0;
        }
    }
    Ok((data, h, w))
}

/// Decodes a mask; a pixel is foreground when its first channel exceeds 127.
pub fn load_mask(path: &Path, framing: Framing) -> Result<(Vec<u8>, usize, usize)> {
    let img = frame(image::open(path)?, framing);
    let rgb = img.to_rgb8();
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    let data = rgb.pixels().map(|px| u8::from(px.0[0] > 127)).collect();
    Ok((data, h, w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_crop_is_clamped() {
        assert_eq!(CropBox::centered(10, 6, 4), CropBox { x1: 3, y1: 1, x2: 7, y2: 5 });
        assert_eq!(CropBox::centered(4, 4, 8), CropBox { x1: 0, y1: 0, x2: 4, y2: 4 });
    }

    #[test]
    fn bbox_crop_expands_and_clamps() {
        // bbox 20x40 at (10, 10): r = 30, center (20, 30)
        let b = CropBox::around_bbox(100, 50, [10, 10, 20, 40]);
        assert_eq!(b, CropBox { x1: 0, y1: 0, x2: 50, y2: 50 });
    }

    #[test]
    fn rgb_is_planar_and_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("px.png");
        let mut img = image::RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        img.put_pixel(1, 0, image::Rgb([0, 0, 255]));
        img.save(&path).unwrap();

        let (data, h, w) = load_rgb(&path, Framing::Resize(2)).unwrap();
        assert_eq!((h, w), (2, 2));
        assert_eq!(data.len(), 12);
        assert!(data.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
