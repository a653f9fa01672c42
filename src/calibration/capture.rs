//! Runtime input capture for generation calibration.
//!
//! Autoregressive models see their real input distribution only at
//! generation time (cache tensors, position offsets). The recorder wraps
//! the live inference call path and stores every input batch passed through
//! it, up to a sample budget, so those inputs can calibrate the
//! quantization pass.

use std::collections::HashMap;

use crate::calibration::dataset::{SampleBatch, TensorData};
use crate::error::Result;

/// Default capture budget for generation calibration.
pub const DEFAULT_CAPTURE_BUDGET: usize = 300;

/// One inference call over named input tensors.
pub trait InferenceRunner {
    /// Run inference, returning named output tensors.
    fn infer(&mut self, inputs: &SampleBatch) -> Result<SampleBatch>;
}

impl<T: InferenceRunner + ?Sized> InferenceRunner for Box<T> {
    fn infer(&mut self, inputs: &SampleBatch) -> Result<SampleBatch> {
        (**self).infer(inputs)
    }
}

/// Wrapper that records the inputs an [`InferenceRunner`] is called with.
///
/// With caching enabled, recorded tensors are deduplicated by content hash:
/// a hash plus one shared clone per distinct tensor, in exchange for not
/// storing duplicates (generation repeatedly feeds identical cache blocks).
pub struct InferRequestRecorder<R> {
    inner: R,
    collected: Vec<SampleBatch>,
    budget: usize,
    apply_caching: bool,
    tensor_cache: HashMap<u64, TensorData>,
    cache_hits: usize,
}

impl<R: InferenceRunner> InferRequestRecorder<R> {
    /// Wrap a runner with the default budget and no caching.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            collected: Vec::new(),
            budget: DEFAULT_CAPTURE_BUDGET,
            apply_caching: false,
            tensor_cache: HashMap::new(),
            cache_hits: 0,
        }
    }

    /// Set the capture budget.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    /// Enable content-hash deduplication of recorded tensors.
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.apply_caching = enabled;
        self
    }

    /// Check whether the budget is exhausted.
    pub fn is_full(&self) -> bool {
        self.collected.len() >= self.budget
    }

    /// Recorded batches so far.
    pub fn collected(&self) -> &[SampleBatch] {
        &self.collected
    }

    /// Number of tensors served from the dedup cache.
    pub fn cache_hits(&self) -> usize {
        self.cache_hits
    }

    /// Unwrap, returning the inner runner and the recorded batches.
    pub fn into_parts(self) -> (R, Vec<SampleBatch>) {
        (self.inner, self.collected)
    }

    fn record(&mut self, inputs: &SampleBatch) {
        if self.is_full() {
            return;
        }
        if !self.apply_caching {
            self.collected.push(inputs.clone());
            return;
        }

        let mut copied = SampleBatch::new();
        for (name, tensor) in &inputs.columns {
            let key = tensor.content_hash();
            let shared = match self.tensor_cache.get(&key) {
                Some(cached) => {
                    self.cache_hits += 1;
                    cached.clone()
                }
                None => {
                    self.tensor_cache.insert(key, tensor.clone());
                    tensor.clone()
                }
            };
            copied.columns.insert(name.clone(), shared);
        }
        self.collected.push(copied);
    }
}

impl<R: InferenceRunner> InferenceRunner for InferRequestRecorder<R> {
    fn infer(&mut self, inputs: &SampleBatch) -> Result<SampleBatch> {
        self.record(inputs);
        self.inner.infer(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    struct EchoRunner {
        calls: usize,
    }

    impl InferenceRunner for EchoRunner {
        fn infer(&mut self, inputs: &SampleBatch) -> Result<SampleBatch> {
            self.calls += 1;
            Ok(inputs.clone())
        }
    }

    fn ids_batch(values: Vec<i64>) -> SampleBatch {
        let n = values.len();
        SampleBatch::new().with_column(
            "input_ids",
            TensorData::I64(ndarray::ArcArray::from_shape_vec(IxDyn(&[n]), values).unwrap()),
        )
    }

    #[test]
    fn test_records_and_delegates() {
        let mut recorder = InferRequestRecorder::new(EchoRunner { calls: 0 });
        recorder.infer(&ids_batch(vec![1, 2])).unwrap();
        recorder.infer(&ids_batch(vec![3, 4])).unwrap();

        assert_eq!(recorder.collected().len(), 2);
        let (runner, collected) = recorder.into_parts();
        assert_eq!(runner.calls, 2, "every call must reach the wrapped runner");
        assert_eq!(collected[0], ids_batch(vec![1, 2]));
    }

    #[test]
    fn test_budget_caps_recording_not_inference() {
        let mut recorder = InferRequestRecorder::new(EchoRunner { calls: 0 }).with_budget(2);
        for i in 0..5 {
            recorder.infer(&ids_batch(vec![i])).unwrap();
        }
        assert!(recorder.is_full());
        assert_eq!(recorder.collected().len(), 2, "recording stops at the budget");
        let (runner, _) = recorder.into_parts();
        assert_eq!(runner.calls, 5, "inference itself keeps running");
    }

    #[test]
    fn test_caching_dedups_identical_tensors() {
        let mut recorder =
            InferRequestRecorder::new(EchoRunner { calls: 0 }).with_caching(true);
        let batch = ids_batch(vec![7, 7, 7]);
        recorder.infer(&batch).unwrap();
        recorder.infer(&batch).unwrap();
        recorder.infer(&batch).unwrap();

        assert_eq!(recorder.collected().len(), 3);
        assert_eq!(recorder.cache_hits(), 2, "repeat tensors must come from the cache");
    }

    #[test]
    fn test_caching_keeps_distinct_tensors_distinct() {
        let mut recorder =
            InferRequestRecorder::new(EchoRunner { calls: 0 }).with_caching(true);
        recorder.infer(&ids_batch(vec![1])).unwrap();
        recorder.infer(&ids_batch(vec![2])).unwrap();

        assert_eq!(recorder.cache_hits(), 0);
        assert_eq!(recorder.collected()[0], ids_batch(vec![1]));
        assert_eq!(recorder.collected()[1], ids_batch(vec![2]));
    }

    #[test]
    fn test_default_budget() {
        let recorder = InferRequestRecorder::new(EchoRunner { calls: 0 });
        assert!(!recorder.is_full());
        assert_eq!(DEFAULT_CAPTURE_BUDGET, 300);
    }
}
