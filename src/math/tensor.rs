use crate::error::{Result, SegError};

/// A dense `[N, C, H, W]` stack of `f64` planes.
///
/// Images enter the network in this layout and logits leave it in the same
/// layout with `C == num_classes`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor4 {
    shape: [usize; 4],
    pub data: Vec<f64>,
}

impl Tensor4 {
    pub fn zeros(shape: [usize; 4]) -> Tensor4 {
        Tensor4 { shape, data: vec![0.0; shape.iter().product()] }
    }

    pub fn from_vec(shape: [usize; 4], data: Vec<f64>) -> Result<Tensor4> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(SegError::shape(format!(
                "tensor {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Tensor4 { shape, data })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn n(&self) -> usize {
        self.shape[0]
    }

    pub fn c(&self) -> usize {
        self.shape[1]
    }

    pub fn h(&self) -> usize {
        self.shape[2]
    }

    pub fn w(&self) -> usize {
        self.shape[3]
    }

    pub fn sample_len(&self) -> usize {
        self.shape[1] * self.shape[2] * self.shape[3]
    }

    #[inline]
    pub fn index(&self, n: usize, c: usize, y: usize, x: usize) -> usize {
        ((n * self.shape[1] + c) * self.shape[2] + y) * self.shape[3] + x
    }

    #[inline]
    pub fn get(&self, n: usize, c: usize, y: usize, x: usize) -> f64 {
        self.data[self.index(n, c, y, x)]
    }

    #[inline]
    pub fn set(&mut self, n: usize, c: usize, y: usize, x: usize, value: f64) {
        let i = self.index(n, c, y, x);
        self.data[i] = value;
    }

    pub fn sample(&self, n: usize) -> &[f64] {
        let len = self.sample_len();
        &self.data[n * len..(n + 1) * len]
    }

    pub fn sample_mut(&mut self, n: usize) -> &mut [f64] {
        let len = self.sample_len();
        &mut self.data[n * len..(n + 1) * len]
    }

    /// Per-pixel class label as the arg-max over the channel axis.
    /// Ties resolve to the lowest class index.
    pub fn argmax_classes(&self) -> LabelBatch {
        let [n, c, h, w] = self.shape;
        let mut labels = LabelBatch::zeros(n, h, w);
        for s in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let mut best = 0usize;
                    let mut best_val = self.get(s, 0, y, x);
                    for k in 1..c {
                        let v = self.get(s, k, y, x);
                        if v > best_val || best_val.is_nan() {
                            best = k;
                            best_val = v;
                        }
                    }
                    labels.set(s, y, x, best as u8);
                }
            }
        }
        labels
    }

    /// Concatenates along the sample axis.
    pub fn concat(parts: &[Tensor4]) -> Result<Tensor4> {
        let first = parts
            .first()
            .ok_or_else(|| SegError::shape("cannot concatenate zero tensors"))?;
        let [_, c, h, w] = first.shape;
        let mut n = 0;
        let mut data = Vec::new();
        for part in parts {
            if part.shape[1..] != [c, h, w] {
                return Err(SegError::shape(format!(
                    "cannot concatenate {:?} with {:?}",
                    first.shape, part.shape
                )));
            }
            n += part.shape[0];
            data.extend_from_slice(&part.data);
        }
        Ok(Tensor4 { shape: [n, c, h, w], data })
    }
}

/// A `[N, H, W]` stack of integer class labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelBatch {
    pub n: usize,
    pub h: usize,
    pub w: usize,
    pub data: Vec<u8>,
}

impl LabelBatch {
    pub fn zeros(n: usize, h: usize, w: usize) -> LabelBatch {
        LabelBatch { n, h, w, data: vec![0; n * h * w] }
    }

    pub fn from_vec(n: usize, h: usize, w: usize, data: Vec<u8>) -> Result<LabelBatch> {
        if data.len() != n * h * w {
            return Err(SegError::shape(format!(
                "label batch [{}, {}, {}] needs {} values, got {}",
                n,
                h,
                w,
                n * h * w,
                data.len()
            )));
        }
        Ok(LabelBatch { n, h, w, data })
    }

    pub fn plane_len(&self) -> usize {
        self.h * self.w
    }

    #[inline]
    pub fn get(&self, n: usize, y: usize, x: usize) -> u8 {
        self.data[(n * self.h + y) * self.w + x]
    }

    #[inline]
    pub fn set(&mut self, n: usize, y: usize, x: usize, value: u8) {
        self.data[(n * self.h + y) * self.w + x] = value;
    }

    pub fn sample(&self, n: usize) -> &[u8] {
        let len = self.plane_len();
        &self.data[n * len..(n + 1) * len]
    }

    /// Expands labels into `num_classes` indicator planes.
    pub fn one_hot(&self, num_classes: usize) -> Tensor4 {
        let mut out = Tensor4::zeros([self.n, num_classes, self.h, self.w]);
        for s in 0..self.n {
            for y in 0..self.h {
                for x in 0..self.w {
                    let k = self.get(s, y, x) as usize;
                    if k < num_classes {
                        out.set(s, k, y, x, 1.0);
                    }
                }
            }
        }
        out
    }

    pub fn concat(parts: &[LabelBatch]) -> Result<LabelBatch> {
        let first = parts
            .first()
            .ok_or_else(|| SegError::shape("cannot concatenate zero label batches"))?;
        let mut n = 0;
        let mut data = Vec::new();
        for part in parts {
            if (part.h, part.w) != (first.h, first.w) {
                return Err(SegError::shape(format!(
                    "cannot concatenate {}x{} labels with {}x{}",
                    first.h, first.w, part.h, part.w
                )));
            }
            n += part.n;
            data.extend_from_slice(&part.data);
        }
        Ok(LabelBatch { n, h: first.h, w: first.w, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        let logits = Tensor4::from_vec([1, 2, 1, 3], vec![0.0, 1.0, 5.0, 0.0, 2.0, 5.0]).unwrap();
        assert_eq!(logits.argmax_classes().data, vec![0, 1, 0]);
    }

    #[test]
    fn one_hot_then_argmax_recovers_labels() {
        let labels = LabelBatch::from_vec(2, 2, 2, vec![0, 1, 1, 0, 1, 1, 0, 0]).unwrap();
        assert_eq!(labels.one_hot(2).argmax_classes(), labels);
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(Tensor4::from_vec([1, 1, 2, 2], vec![0.0; 3]).is_err());
    }
}
