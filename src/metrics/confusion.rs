use crate::error::{Result, SegError};
use crate::math::LabelBatch;

/// Zero-union classes are divided by this instead of 0.
pub const UNION_EPSILON: f64 = 1e-8;

/// `K×K` pixel counts addressed as `[predicted][ground_truth]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    k: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> ConfusionMatrix {
        ConfusionMatrix { k: num_classes, counts: vec![0; num_classes * num_classes] }
    }

    /// Builds a matrix from explicit rows (predicted class per row).
    pub fn from_rows(rows: &[Vec<u64>]) -> Result<ConfusionMatrix> {
        let k = rows.len();
        if rows.iter().any(|r| r.len() != k) {
            return Err(SegError::shape("confusion matrix must be square"));
        }
        Ok(ConfusionMatrix { k, counts: rows.concat() })
    }

    pub fn num_classes(&self) -> usize {
        self.k
    }

    pub fn get(&self, pred: usize, gt: usize) -> u64 {
        self.counts[pred * self.k + gt]
    }

    /// Histograms `K * pred + gt` over every pixel of the batch.
    pub fn accumulate(&mut self, pred: &LabelBatch, gt: &LabelBatch) -> Result<()> {
        if (pred.n, pred.h, pred.w) != (gt.n, gt.h, gt.w) {
            return Err(SegError::shape(format!(
                "prediction [{}, {}, {}] vs ground truth [{}, {}, {}]",
                pred.n, pred.h, pred.w, gt.n, gt.h, gt.w
            )));
        }
        for (&p, &g) in pred.data.iter().zip(&gt.data) {
            let (p, g) = (p as usize, g as usize);
            if p >= self.k || g >= self.k {
                return Err(SegError::shape(format!(
                    "label pair ({p}, {g}) outside {} classes",
                    self.k
                )));
            }
            self.counts[self.k * p + g] += 1;
        }
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn trace(&self) -> u64 {
        (0..self.k).map(|c| self.get(c, c)).sum()
    }

    pub fn row_sum(&self, pred: usize) -> u64 {
        (0..self.k).map(|g| self.get(pred, g)).sum()
    }

    pub fn col_sum(&self, gt: usize) -> u64 {
        (0..self.k).map(|p| self.get(p, gt)).sum()
    }

    /// `trace / total`; NaN when no pixel has been counted.
    pub fn pixel_accuracy(&self) -> f64 {
        self.trace() as f64 / self.total() as f64
    }

    /// Per-class `C[c][c] / (row + col - C[c][c])` with zero unions replaced
    /// by [`UNION_EPSILON`].
    pub fn iou_per_class(&self) -> Vec<f64> {
        (0..self.k)
            .map(|c| {
                let diag = self.get(c, c) as f64;
                let mut union = self.row_sum(c) as f64 + self.col_sum(c) as f64 - diag;
                if union == 0.0 {
                    union = UNION_EPSILON;
                }
                diag / union
            })
            .collect()
    }
}

/// Per-sample IoU and Dice summed over a batch, straight from the label maps.
///
/// Samples with an empty denominator contribute NaN (0/0) to the sums.
pub fn drc_sums(pred: &LabelBatch, gt: &LabelBatch) -> (f64, f64) {
    let mut iou_sum = 0.0;
    let mut dice_sum = 0.0;
    for s in 0..pred.n {
        let (p, g) = (pred.sample(s), gt.sample(s));
        let mut inter = 0u64;
        let mut union = 0u64;
        let mut p_sum = 0u64;
        let mut g_sum = 0u64;
        for (&a, &b) in p.iter().zip(g) {
            let (a, b) = (a as u64, b as u64);
            inter += a * b;
            union += u64::from(a + b > 0);
            p_sum += a;
            g_sum += b;
        }
        iou_sum += inter as f64 / union as f64;
        dice_sum += 2.0 * inter as f64 / (p_sum + g_sum) as f64;
    }
    (iou_sum, dice_sum)
}
