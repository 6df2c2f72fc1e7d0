use crate::math::LabelBatch;

/// Segmentation covering of one batch, averaged over its samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegCover {
    /// Every ground-truth segment weighted equally.
    pub mean: f64,
    /// Segments weighted by their pixel area.
    pub scaled: f64,
}

/// Covers each ground-truth segment of `seg_a` with its best-overlapping
/// segment of `seg_b`.
///
/// Labels are collected over the whole batch. For every label of `seg_a`
/// the per-sample best IoU over all labels of `seg_b` is accumulated; a
/// sample where both masks are empty scores -100 for that pair and so never
/// beats the initial 0.
pub fn average_segcover(seg_a: &LabelBatch, seg_b: &LabelBatch) -> SegCover {
    let n = seg_a.n;
    let labels_a = present_labels(seg_a);
    let labels_b = present_labels(seg_b);

    let mut mean_scores = vec![0.0; n];
    let mut scaled_scores = vec![0.0; n];
    let mut segments = vec![0.0; n];
    let mut scaling_sum = vec![0.0; n];

    for &a in &labels_a {
        let mut max_iou = vec![0.0f64; n];
        for &b in &labels_b {
            for (s, best) in max_iou.iter_mut().enumerate() {
                let iou = binary_iou(seg_a.sample(s), a, seg_b.sample(s), b);
                if iou > *best {
                    *best = iou;
                }
            }
        }
        for s in 0..n {
            let area = seg_a.sample(s).iter().filter(|&&v| v == a).count() as f64;
            mean_scores[s] += max_iou[s];
            if area > 0.0 {
                segments[s] += 1.0;
            }
            scaled_scores[s] += area * max_iou[s];
            scaling_sum[s] += area;
        }
    }

    let mean = (0..n).map(|s| mean_scores[s] / f64::max(segments[s], 1.0)).sum::<f64>() / n as f64;
    let scaled = (0..n).map(|s| scaled_scores[s] / f64::max(scaling_sum[s], 1.0)).sum::<f64>() / n as f64;
    SegCover { mean, scaled }
}

fn present_labels(batch: &LabelBatch) -> Vec<u8> {
    let mut seen = [false; 256];
    for &v in &batch.data {
        seen[v as usize] = true;
    }
    (0..=255u8).filter(|&v| seen[v as usize]).collect()
}

fn binary_iou(a: &[u8], label_a: u8, b: &[u8], label_b: u8) -> f64 {
    let mut inter = 0u64;
    let mut union = 0u64;
    for (&x, &y) in a.iter().zip(b) {
        let (in_a, in_b) = (x == label_a, y == label_b);
        inter += u64::from(in_a && in_b);
        union += u64::from(in_a || in_b);
    }
    if union == 0 {
        -100.0
    } else {
        inter as f64 / union as f64
    }
}
