/// Adjusted Rand Index between two flat labelings.
///
/// Built on the pair-confusion counts; identical partitions (no
/// disagreeing pair in either direction) score exactly 1.0, which also
/// covers the single-cluster and empty cases.
pub fn adjusted_rand_index(truth: &[u8], pred: &[u8]) -> f64 {
    debug_assert_eq!(truth.len(), pred.len());
    let n = truth.len() as i128;

    let mut contingency = vec![0i128; 256 * 256];
    let mut truth_sizes = [0i128; 256];
    let mut pred_sizes = [0i128; 256];
    for (&t, &p) in truth.iter().zip(pred) {
        contingency[t as usize * 256 + p as usize] += 1;
        truth_sizes[t as usize] += 1;
        pred_sizes[p as usize] += 1;
    }

    let sum_squares: i128 = contingency.iter().map(|&c| c * c).sum();
    let tp = sum_squares - n;
    let fp = pred_sizes.iter().map(|&c| c * c).sum::<i128>() - sum_squares;
    let fn_ = truth_sizes.iter().map(|&c| c * c).sum::<i128>() - sum_squares;
    let tn = n * n - fp - fn_ - sum_squares;

    if fn_ == 0 && fp == 0 {
        return 1.0;
    }
    let numerator = 2.0 * (tp * tn - fn_ * fp) as f64;
    let denominator = ((tp + fn_) * (fn_ + tn) + (tp + fp) * (fp + tn)) as f64;
    numerator / denominator
}
