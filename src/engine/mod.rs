//! External collaborator ports and engine request types.
//!
//! The compression engine, dataset service, tokenizer, task-inference
//! service and export service are abstract capabilities with narrow
//! contracts, so the resolver, classifier and policy selector can be
//! implemented and tested independently of any specific binding. The crate
//! ships a [`ReferenceEngine`] binding that performs real affine
//! quantization.

mod reference;

use std::path::PathBuf;

use crate::calibration::{CalibrationDataset, SampleBatch};
use crate::config::{CompressWeightsMode, IgnoredScope, ModelArchitecture, SensitivityMetric};
use crate::error::Result;
use crate::graph::ModelGraph;

pub use crate::calibration::InferenceRunner;
pub use reference::ReferenceEngine;

pub(crate) use reference::quantize_values;

/// Structured request for a weight-only compression pass.
#[derive(Clone, Debug)]
pub struct WeightCompressionRequest {
    /// Target integer mode.
    pub mode: CompressWeightsMode,
    /// Fraction of weight layers compressed to the primary precision.
    pub ratio: f32,
    /// Group width along the innermost axis; `None` quantizes per row.
    pub group_size: Option<usize>,
    /// Compress embedding tables and the final projection as well.
    pub all_layers: bool,
    /// Layer-ranking metric for mixed-precision assignment.
    pub sensitivity_metric: Option<SensitivityMetric>,
    /// Operations exempt from compression.
    pub ignored_scope: IgnoredScope,
    /// Optional data for data-aware compression.
    pub dataset: Option<Vec<SampleBatch>>,
}

/// Per-operation-type overrides for the activation-smoothing sub-algorithm.
///
/// A negative alpha disables smoothing for that operation type.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SmoothQuantOverrides {
    /// Override for matrix-multiply nodes.
    pub matmul: Option<f32>,
}

/// Structured request for a full (weights + activations) quantization pass.
#[derive(Clone, Debug)]
pub struct FullQuantizationRequest {
    /// Architecture hint.
    pub model_type: ModelArchitecture,
    /// Use the fast bias-correction variant.
    pub fast_bias_correction: bool,
    /// Operations exempt from quantization.
    pub ignored_scope: IgnoredScope,
    /// Maximum number of calibration batches consumed.
    pub subset_size: Option<usize>,
    /// Activation-smoothing overrides.
    pub smooth_quant: SmoothQuantOverrides,
}

/// Compression/quantization engine port.
///
/// Accepts a graph and a structured configuration and returns the
/// transformed graph. The calibration wrapper it receives is a finite list
/// of input batches, consumed once.
pub trait CompressionEngine {
    /// Apply weight-only compression.
    fn compress_weights(
        &self,
        model: ModelGraph,
        request: &WeightCompressionRequest,
    ) -> Result<ModelGraph>;

    /// Apply full static quantization.
    fn quantize(
        &self,
        model: ModelGraph,
        request: &FullQuantizationRequest,
        calibration: &[SampleBatch],
    ) -> Result<ModelGraph>;
}

/// Dataset service port: load-by-name with config and split selection.
pub trait DatasetProvider {
    /// Load a named dataset split.
    fn load(
        &self,
        name: &str,
        config_name: Option<&str>,
        split: &str,
    ) -> Result<CalibrationDataset>;

    /// Load raw text samples for tokenized materialization.
    fn load_text(&self, name: &str, split: &str) -> Result<Vec<String>>;
}

/// Tokenizer port used to materialize named text datasets.
pub trait TextTokenizer {
    /// Encode text into token ids, truncated to `max_len`.
    fn encode(&self, text: &str, max_len: usize) -> Vec<i64>;
}

/// Task-inference service port.
pub trait TaskInference {
    /// Infer the task label for a model identifier, or `None`.
    fn infer_task(&self, model_id: &str) -> Option<String>;
}

/// A trainable model that must be exported to the intermediate graph
/// representation before quantization.
pub trait TrainableModel {
    /// Model identifier (for task inference and metadata).
    fn identifier(&self) -> &str;

    /// Architecture name (for metadata).
    fn architecture(&self) -> &str;

    /// Input columns the forward computation declares.
    fn signature_columns(&self) -> Vec<String>;

    /// Whether the model uses a generation cache.
    fn uses_cache(&self) -> bool;

    /// Preferred export opset.
    fn default_opset(&self) -> u32 {
        14
    }

    /// Check that the model accepts the given dummy-input columns.
    fn accepts_inputs(&self, columns: &[String]) -> bool {
        let signature = self.signature_columns();
        columns.iter().all(|c| signature.iter().any(|s| s == c))
    }
}

/// Export request parameters.
#[derive(Clone, Debug)]
pub struct ExportRequest {
    /// Destination path for the exported graph artifact.
    pub output: PathBuf,
    /// Export opset.
    pub opset: u32,
    /// Apply the stateful-decoder optimization.
    pub stateful: bool,
}

/// Result of a model export.
#[derive(Clone, Debug)]
pub struct ExportOutcome {
    /// The exported graph.
    pub graph: ModelGraph,
    /// Artifact files written by the export, including any temporary
    /// interchange-format files.
    pub artifact_paths: Vec<PathBuf>,
    /// Export input names.
    pub input_names: Vec<String>,
    /// Whether the secondary interchange-format pathway was used.
    pub used_fallback_format: bool,
}

/// Model export service port.
pub trait ExportService {
    /// Export a trainable model to the intermediate graph representation,
    /// falling back to the interchange-format pathway when the primary
    /// export fails.
    fn export(&self, model: &dyn TrainableModel, request: &ExportRequest) -> Result<ExportOutcome>;
}
