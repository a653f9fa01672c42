//! Batched calibration loader.
//!
//! Wraps a calibration dataset in a batched stream with a seeded sampling
//! order. Partial trailing batches are kept, and input columns the target
//! model's forward computation does not declare are filtered out before
//! batching.

use ndarray::{stack, Axis};
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::calibration::dataset::{CalibrationDataset, SampleBatch, TensorData};
use crate::error::{CuantizarError, Result};

/// Configuration for the calibration loader.
#[derive(Clone, Debug)]
pub struct CalibrationLoaderConfig {
    batch_size: usize,
    seed: u64,
    filter_columns: bool,
}

impl Default for CalibrationLoaderConfig {
    fn default() -> Self {
        Self { batch_size: 1, seed: 42, filter_columns: true }
    }
}

impl CalibrationLoaderConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch size (minimum 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the sampling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Toggle column filtering against the model signature.
    pub fn with_filter_columns(mut self, enabled: bool) -> Self {
        self.filter_columns = enabled;
        self
    }

    /// Get the batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get the seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Result of loading: batched inputs plus any degraded-mode warnings.
#[derive(Clone, Debug)]
pub struct LoadedCalibration {
    /// Stacked input batches in sampling order.
    pub batches: Vec<SampleBatch>,
    /// Warnings raised while loading (execution continued).
    pub warnings: Vec<String>,
}

/// Batched calibration loader.
#[derive(Clone, Debug, Default)]
pub struct CalibrationLoader {
    config: CalibrationLoaderConfig,
}

impl CalibrationLoader {
    /// Create a loader.
    pub fn new(config: CalibrationLoaderConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &CalibrationLoaderConfig {
        &self.config
    }

    /// Build batches from a dataset, filtering columns against the model's
    /// declared forward parameters.
    ///
    /// The sampling order is a seeded permutation; the same seed yields the
    /// same batch sequence. No partial batch is dropped.
    pub fn load(
        &self,
        dataset: &CalibrationDataset,
        signature_columns: &[String],
    ) -> Result<LoadedCalibration> {
        let mut warnings = Vec::new();

        let filter = if !self.config.filter_columns {
            false
        } else if dataset.column_names().is_none() {
            warnings.push(
                "column filtering disabled as the calibration dataset exposes no column metadata"
                    .to_string(),
            );
            false
        } else {
            true
        };

        let mut order: Vec<usize> = (0..dataset.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        order.shuffle(&mut rng);

        let mut batches = Vec::with_capacity(order.len().div_ceil(self.config.batch_size));
        for chunk in order.chunks(self.config.batch_size) {
            let mut samples: Vec<SampleBatch> =
                chunk.iter().map(|&i| dataset.samples()[i].clone()).collect();
            if filter {
                for sample in &mut samples {
                    sample.retain_columns(signature_columns);
                }
            }
            batches.push(collate(dataset.name(), &samples)?);
        }

        Ok(LoadedCalibration { batches, warnings })
    }
}

/// Stack per-example tensors into one batch along a new leading axis.
fn collate(dataset_name: &str, samples: &[SampleBatch]) -> Result<SampleBatch> {
    let Some(first) = samples.first() else {
        return Ok(SampleBatch::new());
    };

    let mut batch = SampleBatch::new();
    for (column, head) in &first.columns {
        let mismatch = || CuantizarError::DatasetMaterialization {
            name: dataset_name.to_string(),
            message: format!("column '{column}' is missing or shape-inconsistent across samples"),
        };
        let stacked = match head {
            TensorData::F32(_) => {
                let views = samples
                    .iter()
                    .map(|s| match s.get(column) {
                        Some(TensorData::F32(a)) if a.shape() == head.shape() => Ok(a.view()),
                        _ => Err(mismatch()),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let arr = stack(Axis(0), &views).map_err(|_| mismatch())?;
                TensorData::F32(arr.into_shared())
            }
            TensorData::I64(_) => {
                let views = samples
                    .iter()
                    .map(|s| match s.get(column) {
                        Some(TensorData::I64(a)) if a.shape() == head.shape() => Ok(a.view()),
                        _ => Err(mismatch()),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let arr = stack(Axis(0), &views).map_err(|_| mismatch())?;
                TensorData::I64(arr.into_shared())
            }
        };
        batch.columns.insert(column.clone(), stacked);
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature() -> Vec<String> {
        vec!["input_ids".to_string(), "attention_mask".to_string()]
    }

    #[test]
    fn test_partial_batches_kept() {
        let dataset = CalibrationDataset::synthetic(10, 4, 1);
        let loader = CalibrationLoader::new(CalibrationLoaderConfig::new().with_batch_size(3));
        let loaded = loader.load(&dataset, &signature()).unwrap();
        assert_eq!(loaded.batches.len(), 4, "10 samples at batch size 3 give 3 full + 1 partial");
        assert_eq!(loaded.batches[0].get("input_ids").unwrap().shape(), &[3, 4]);
        assert_eq!(loaded.batches[3].get("input_ids").unwrap().shape(), &[1, 4]);
    }

    #[test]
    fn test_sampling_order_is_seed_deterministic() {
        let dataset = CalibrationDataset::synthetic(20, 4, 5);
        let loader = CalibrationLoader::new(
            CalibrationLoaderConfig::new().with_batch_size(4).with_seed(11),
        );
        let a = loader.load(&dataset, &signature()).unwrap();
        let b = loader.load(&dataset, &signature()).unwrap();
        assert_eq!(a.batches, b.batches, "same seed must produce the same ordered batches");

        let other = CalibrationLoader::new(
            CalibrationLoaderConfig::new().with_batch_size(4).with_seed(12),
        );
        let c = other.load(&dataset, &signature()).unwrap();
        assert_ne!(a.batches, c.batches);
    }

    #[test]
    fn test_undeclared_columns_filtered() {
        let dataset = CalibrationDataset::synthetic(4, 4, 2);
        let loader = CalibrationLoader::new(CalibrationLoaderConfig::new().with_batch_size(2));
        let loaded = loader.load(&dataset, &["input_ids".to_string()]).unwrap();
        assert!(loaded.warnings.is_empty());
        for batch in &loaded.batches {
            assert!(batch.get("attention_mask").is_none(), "undeclared column must be dropped");
            assert!(batch.get("input_ids").is_some());
        }
    }

    #[test]
    fn test_missing_column_metadata_skips_filtering_with_warning() {
        let samples = CalibrationDataset::synthetic(4, 4, 2).samples().to_vec();
        let dataset = CalibrationDataset::without_column_names("opaque", samples);
        let loader = CalibrationLoader::new(CalibrationLoaderConfig::new());
        let loaded = loader.load(&dataset, &["input_ids".to_string()]).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("column metadata"));
        assert!(
            loaded.batches[0].get("attention_mask").is_some(),
            "filtering must be skipped, not applied blindly"
        );
    }

    #[test]
    fn test_batch_size_zero_clamped_to_one() {
        let config = CalibrationLoaderConfig::new().with_batch_size(0);
        assert_eq!(config.batch_size(), 1);
    }

    #[test]
    fn test_empty_dataset_yields_no_batches() {
        let dataset = CalibrationDataset::new("empty", vec![]);
        let loader = CalibrationLoader::new(CalibrationLoaderConfig::new());
        let loaded = loader.load(&dataset, &signature()).unwrap();
        assert!(loaded.batches.is_empty());
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let mut samples = CalibrationDataset::synthetic(2, 4, 2).samples().to_vec();
        let odd = CalibrationDataset::synthetic(1, 6, 9).samples()[0].clone();
        samples.push(odd);
        let dataset = CalibrationDataset::new("ragged", samples);
        let loader = CalibrationLoader::new(CalibrationLoaderConfig::new().with_batch_size(3));
        assert!(loader.load(&dataset, &signature()).is_err());
    }
}
