//! Calibration dataset: named-column samples with deterministic subsetting.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use ndarray::{ArcArray, IxDyn};
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Shared dynamic-dimension array; clones share the underlying buffer.
pub type ArcArrayD<T> = ArcArray<T, IxDyn>;

/// One named input tensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    /// Floating-point payload.
    F32(ArcArrayD<f32>),
    /// Integer payload (token ids, masks).
    I64(ArcArrayD<i64>),
}

impl TensorData {
    /// Tensor shape.
    pub fn shape(&self) -> &[usize] {
        match self {
            TensorData::F32(a) => a.shape(),
            TensorData::I64(a) => a.shape(),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(a) => a.len(),
            TensorData::I64(a) => a.len(),
        }
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash of the tensor content (type tag, shape and raw values).
    ///
    /// Used by the capture recorder to share storage across duplicate
    /// tensors.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        match self {
            TensorData::F32(a) => {
                0u8.hash(&mut hasher);
                a.shape().hash(&mut hasher);
                for v in a.iter() {
                    v.to_bits().hash(&mut hasher);
                }
            }
            TensorData::I64(a) => {
                1u8.hash(&mut hasher);
                a.shape().hash(&mut hasher);
                for v in a.iter() {
                    v.hash(&mut hasher);
                }
            }
        }
        hasher.finish()
    }
}

/// One model-input batch: named tensors keyed by input column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    /// Input tensors by column name.
    pub columns: BTreeMap<String, TensorData>,
}

impl SampleBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a named tensor.
    pub fn with_column(mut self, name: impl Into<String>, data: TensorData) -> Self {
        self.columns.insert(name.into(), data);
        self
    }

    /// Get a tensor by column name.
    pub fn get(&self, name: &str) -> Option<&TensorData> {
        self.columns.get(name)
    }

    /// Column names, sorted.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    /// Drop every column not in `keep`.
    pub fn retain_columns(&mut self, keep: &[String]) {
        self.columns.retain(|name, _| keep.iter().any(|k| k == name));
    }
}

/// A finite, restartable sequence of calibration samples.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CalibrationDataset {
    name: String,
    /// Column metadata; `None` when the source does not expose it, which
    /// disables column filtering downstream.
    column_names: Option<Vec<String>>,
    samples: Vec<SampleBatch>,
}

impl CalibrationDataset {
    /// Create a dataset from samples.
    pub fn new(name: impl Into<String>, samples: Vec<SampleBatch>) -> Self {
        let column_names = samples
            .first()
            .map(|s| s.column_names().iter().map(|c| (*c).to_string()).collect());
        Self { name: name.into(), column_names, samples }
    }

    /// Create a dataset without column metadata.
    pub fn without_column_names(name: impl Into<String>, samples: Vec<SampleBatch>) -> Self {
        Self { name: name.into(), column_names: None, samples }
    }

    /// Create a synthetic token dataset for testing.
    pub fn synthetic(num_samples: usize, seq_len: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let samples: Vec<SampleBatch> = (0..num_samples)
            .map(|_| {
                let ids: Vec<i64> = (0..seq_len).map(|_| i64::from(rng.random::<u16>())).collect();
                let mask: Vec<i64> = vec![1; seq_len];
                SampleBatch::new()
                    .with_column(
                        "input_ids",
                        TensorData::I64(ArcArrayD::from_shape_vec(IxDyn(&[seq_len]), ids).unwrap()),
                    )
                    .with_column(
                        "attention_mask",
                        TensorData::I64(
                            ArcArrayD::from_shape_vec(IxDyn(&[seq_len]), mask).unwrap(),
                        ),
                    )
            })
            .collect();
        Self::new("synthetic", samples)
    }

    /// Dataset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column metadata, if the source exposes it.
    pub fn column_names(&self) -> Option<&[String]> {
        self.column_names.as_deref()
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All samples.
    pub fn samples(&self) -> &[SampleBatch] {
        &self.samples
    }

    /// Shuffle samples in place with a seeded generator.
    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);
    }

    /// Keep the first `n` samples.
    pub fn take(mut self, n: usize) -> Self {
        self.samples.truncate(n);
        self
    }

    /// Apply a transform to every sample.
    pub fn map(mut self, f: impl Fn(SampleBatch) -> SampleBatch) -> Self {
        self.samples = self.samples.into_iter().map(f).collect();
        self
    }
}

/// User preprocessing applied after loading, per example or batched over the
/// whole sample list.
pub enum Preprocess<'f> {
    /// Transform each example independently.
    PerExample(&'f dyn Fn(SampleBatch) -> SampleBatch),
    /// Transform the full sample list at once.
    Batched(&'f dyn Fn(Vec<SampleBatch>) -> Vec<SampleBatch>),
}

/// Request for [`build_calibration_dataset`].
#[derive(Clone, Debug)]
pub struct CalibrationDatasetRequest {
    /// Dataset name on the provider.
    pub name: String,
    /// Maximum number of samples in the calibration subset.
    pub num_samples: usize,
    /// Provider-specific configuration name.
    pub config_name: Option<String>,
    /// Split to draw samples from.
    pub split: String,
    /// Shuffle seed; the same seed always yields the same subset.
    pub seed: u64,
}

impl CalibrationDatasetRequest {
    /// Create a request with the conventional defaults (100 samples from
    /// the training split).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            num_samples: 100,
            config_name: None,
            split: "train".into(),
            seed: 42,
        }
    }

    /// Set the sample cap.
    pub fn with_num_samples(mut self, n: usize) -> Self {
        self.num_samples = n;
        self
    }

    /// Set the configuration name.
    pub fn with_config_name(mut self, name: impl Into<String>) -> Self {
        self.config_name = Some(name.into());
        self
    }

    /// Set the split.
    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split = split.into();
        self
    }

    /// Set the shuffle seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Build a calibration dataset: load, shuffle with the request seed, take
/// the capped subset, then apply the optional preprocessing.
///
/// Always shuffle-then-truncate, never sampled without replacement across
/// the full set, so a seed pins the exact subset across runs.
pub fn build_calibration_dataset(
    provider: &dyn crate::engine::DatasetProvider,
    request: &CalibrationDatasetRequest,
    preprocess: Option<Preprocess<'_>>,
) -> Result<CalibrationDataset> {
    let mut dataset =
        provider.load(&request.name, request.config_name.as_deref(), &request.split)?;

    let n = request.num_samples.min(dataset.len());
    dataset.shuffle(request.seed);
    let mut dataset = dataset.take(n);

    match preprocess {
        Some(Preprocess::PerExample(f)) => dataset = dataset.map(f),
        Some(Preprocess::Batched(f)) => {
            let samples = f(std::mem::take(&mut dataset.samples));
            dataset.samples = samples;
        }
        None => {}
    }

    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DatasetProvider;

    struct FixedProvider {
        dataset: CalibrationDataset,
    }

    impl DatasetProvider for FixedProvider {
        fn load(
            &self,
            _name: &str,
            _config_name: Option<&str>,
            _split: &str,
        ) -> Result<CalibrationDataset> {
            Ok(self.dataset.clone())
        }

        fn load_text(&self, _name: &str, _split: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn ids_of(dataset: &CalibrationDataset) -> Vec<i64> {
        dataset
            .samples()
            .iter()
            .map(|s| match s.get("input_ids").unwrap() {
                TensorData::I64(a) => a[[0]],
                TensorData::F32(_) => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_synthetic_dataset_shape() {
        let dataset = CalibrationDataset::synthetic(5, 16, 42);
        assert_eq!(dataset.len(), 5);
        assert_eq!(
            dataset.column_names().unwrap(),
            &["attention_mask".to_string(), "input_ids".to_string()]
        );
        assert_eq!(dataset.samples()[0].get("input_ids").unwrap().shape(), &[16]);
    }

    #[test]
    fn test_shuffle_is_seed_deterministic() {
        let mut a = CalibrationDataset::synthetic(50, 4, 7);
        let mut b = CalibrationDataset::synthetic(50, 4, 7);
        a.shuffle(123);
        b.shuffle(123);
        assert_eq!(ids_of(&a), ids_of(&b), "same seed must yield the same order");

        let mut c = CalibrationDataset::synthetic(50, 4, 7);
        c.shuffle(124);
        assert_ne!(ids_of(&a), ids_of(&c), "different seeds must yield different orders");
    }

    #[test]
    fn test_factory_shuffle_then_take_subset_is_reproducible() {
        let provider = FixedProvider { dataset: CalibrationDataset::synthetic(100, 4, 3) };
        let request = CalibrationDatasetRequest::new("any").with_num_samples(10).with_seed(99);

        let first = build_calibration_dataset(&provider, &request, None).unwrap();
        let second = build_calibration_dataset(&provider, &request, None).unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(ids_of(&first), ids_of(&second), "same seed and cap must pin the subset");
    }

    #[test]
    fn test_factory_cap_exceeding_length() {
        let provider = FixedProvider { dataset: CalibrationDataset::synthetic(3, 4, 3) };
        let request = CalibrationDatasetRequest::new("any").with_num_samples(10);
        let dataset = build_calibration_dataset(&provider, &request, None).unwrap();
        assert_eq!(dataset.len(), 3);
    }

    #[test]
    fn test_factory_per_example_preprocess() {
        let provider = FixedProvider { dataset: CalibrationDataset::synthetic(4, 4, 3) };
        let request = CalibrationDatasetRequest::new("any");
        let truncate = |mut s: SampleBatch| {
            s.columns.remove("attention_mask");
            s
        };
        let dataset =
            build_calibration_dataset(&provider, &request, Some(Preprocess::PerExample(&truncate)))
                .unwrap();
        assert!(dataset.samples().iter().all(|s| s.get("attention_mask").is_none()));
    }

    #[test]
    fn test_factory_batched_preprocess() {
        let provider = FixedProvider { dataset: CalibrationDataset::synthetic(6, 4, 3) };
        let request = CalibrationDatasetRequest::new("any");
        let halve = |samples: Vec<SampleBatch>| samples.into_iter().step_by(2).collect();
        let dataset =
            build_calibration_dataset(&provider, &request, Some(Preprocess::Batched(&halve)))
                .unwrap();
        assert_eq!(dataset.len(), 3);
    }

    #[test]
    fn test_content_hash_distinguishes_values_and_shapes() {
        let a = TensorData::I64(ArcArrayD::from_shape_vec(IxDyn(&[4]), vec![1, 2, 3, 4]).unwrap());
        let b = TensorData::I64(ArcArrayD::from_shape_vec(IxDyn(&[4]), vec![1, 2, 3, 5]).unwrap());
        let c =
            TensorData::I64(ArcArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1, 2, 3, 4]).unwrap());
        assert_eq!(a.content_hash(), a.clone().content_hash());
        assert_ne!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_retain_columns() {
        let mut batch = CalibrationDataset::synthetic(1, 4, 1).samples()[0].clone();
        batch.retain_columns(&["input_ids".to_string()]);
        assert_eq!(batch.column_names(), vec!["input_ids"]);
    }
}
