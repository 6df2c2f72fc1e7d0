use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::data::sample::Sample;
use crate::error::Result;

/// Random-access source of decoded samples.
pub trait SegDataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self, index: usize) -> Result<Sample>;
}

/// Counts samples replaced by the fallback since the stream was built.
#[derive(Debug, Clone, Default)]
pub struct FailureCounter(Arc<AtomicUsize>);

impl FailureCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Loads `index`, substituting sample 0 when it fails to decode.
///
/// The failure is logged and counted. When sample 0 itself cannot be
/// decoded the error is returned.
pub fn fetch_with_fallback(dataset: &dyn SegDataset, index: usize, failures: &FailureCounter) -> Result<Sample> {
    match dataset.load(index) {
        Ok(sample) => Ok(sample),
        Err(err) => {
            warn!(index, error = %err, "loading error, substituting sample #0");
            failures.bump();
            dataset.load(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegError;

    struct Flaky {
        broken: Vec<usize>,
    }

    impl SegDataset for Flaky {
        fn len(&self) -> usize {
            4
        }

        fn load(&self, index: usize) -> Result<Sample> {
            if self.broken.contains(&index) {
                return Err(SegError::decode(index, "truncated file"));
            }
            Sample::new(vec![index as f64; 3], vec![0], 3, 1, 1)
        }
    }

    #[test]
    fn broken_sample_falls_back_to_first() {
        let data = Flaky { broken: vec![2] };
        let failures = FailureCounter::default();
        let sample = fetch_with_fallback(&data, 2, &failures).unwrap();
        assert_eq!(sample.image[0], 0.0);
        assert_eq!(failures.get(), 1);
        fetch_with_fallback(&data, 3, &failures).unwrap();
        assert_eq!(failures.get(), 1);
    }

    #[test]
    fn broken_fallback_propagates() {
        let data = Flaky { broken: vec![0, 1] };
        let failures = FailureCounter::default();
        assert!(fetch_with_fallback(&data, 1, &failures).is_err());
    }
}
