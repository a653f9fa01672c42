//! Weight-compression configuration.

use serde::{Deserialize, Serialize};

use crate::calibration::SampleBatch;
use crate::config::scope::IgnoredScope;
use crate::error::{CuantizarError, Result};

/// Default sample cap when materializing a named calibration dataset for
/// weight compression.
pub const DEFAULT_COMPRESSION_SAMPLES: usize = 128;

/// Integer weight-compression mode, derived from bit width and symmetry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressWeightsMode {
    Int8Sym,
    Int8Asym,
    Int4Sym,
    Int4Asym,
}

impl CompressWeightsMode {
    /// Select the mode for a bit width and symmetry flag.
    ///
    /// Only 8 and 4 bits are accepted; this is the hard precondition check
    /// at the configuration boundary.
    pub fn from_bits(bits: u8, sym: bool) -> Result<Self> {
        match (bits, sym) {
            (8, true) => Ok(CompressWeightsMode::Int8Sym),
            (8, false) => Ok(CompressWeightsMode::Int8Asym),
            (4, true) => Ok(CompressWeightsMode::Int4Sym),
            (4, false) => Ok(CompressWeightsMode::Int4Asym),
            _ => Err(CuantizarError::ConfigValue {
                field: "bits".into(),
                message: format!("unsupported bit width: {bits}"),
                suggestion: "Use 4 or 8".into(),
            }),
        }
    }

    /// Bit width of this mode.
    pub fn bits(&self) -> u8 {
        match self {
            CompressWeightsMode::Int8Sym | CompressWeightsMode::Int8Asym => 8,
            CompressWeightsMode::Int4Sym | CompressWeightsMode::Int4Asym => 4,
        }
    }

    /// Whether the mode is symmetric (zero-point fixed at 0).
    pub fn is_symmetric(&self) -> bool {
        matches!(self, CompressWeightsMode::Int8Sym | CompressWeightsMode::Int4Sym)
    }
}

/// Metric ranking layers by quantization sensitivity when a compression
/// ratio splits them across precisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityMetric {
    WeightQuantizationError,
    HessianInputActivation,
    MeanActivationVariance,
    MaxActivationVariance,
    MeanActivationMagnitude,
}

impl SensitivityMetric {
    /// Parse a metric name, case-insensitively.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "weight_quantization_error" => Ok(Self::WeightQuantizationError),
            "hessian_input_activation" => Ok(Self::HessianInputActivation),
            "mean_activation_variance" => Ok(Self::MeanActivationVariance),
            "max_activation_variance" => Ok(Self::MaxActivationVariance),
            "mean_activation_magnitude" => Ok(Self::MeanActivationMagnitude),
            other => Err(CuantizarError::ConfigValue {
                field: "sensitivity_metric".into(),
                message: format!("unknown metric '{other}'"),
                suggestion: "Use one of: weight_quantization_error, hessian_input_activation, mean_activation_variance, max_activation_variance, mean_activation_magnitude".into(),
            }),
        }
    }
}

/// Calibration data attached to a weight-compression configuration: either
/// in-memory samples, or a named dataset to materialize through a tokenizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetRef {
    /// Named dataset, tokenized at materialization time.
    Named(String),
    /// In-memory sample batches.
    Samples(Vec<SampleBatch>),
}

/// Configuration for weight-only compression.
///
/// Constructed once from user input or a JSON dict and consumed read-only.
/// Hybrid runs derive per-pass variants via `with_*` overrides; the caller's
/// value is never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightCompressionConfig {
    /// Bit width (8 or 4).
    pub bits: u8,
    /// Symmetric quantization (zero-point fixed at 0).
    pub sym: bool,
    /// Fraction of weight layers compressed to the primary precision; the
    /// remainder falls back to 8-bit.
    #[serde(default = "default_ratio")]
    pub ratio: f32,
    /// Group width along the innermost axis; `None` quantizes per row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_size: Option<usize>,
    /// Compress embedding tables and the final projection as well.
    #[serde(default)]
    pub all_layers: bool,
    /// Layer-ranking metric for mixed-precision assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity_metric: Option<SensitivityMetric>,
    /// Operations exempt from compression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored_scope: Option<IgnoredScope>,
    /// Calibration data reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetRef>,
    /// Tokenizer identifier used to materialize a named dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,
    /// Sample-count cap for dataset materialization and hybrid calibration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_samples: Option<usize>,
}

fn default_ratio() -> f32 {
    1.0
}

impl Default for WeightCompressionConfig {
    fn default() -> Self {
        Self {
            bits: 8,
            sym: true,
            ratio: 1.0,
            group_size: None,
            all_layers: false,
            sensitivity_metric: None,
            ignored_scope: None,
            dataset: None,
            tokenizer: None,
            num_samples: None,
        }
    }
}

impl WeightCompressionConfig {
    /// Create a configuration, validating the bit width.
    pub fn new(bits: u8, sym: bool) -> Result<Self> {
        CompressWeightsMode::from_bits(bits, sym)?;
        Ok(Self { bits, sym, ..Self::default() })
    }

    /// Parse a configuration from a JSON dict.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| CuantizarError::ConfigParsing { message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field combinations.
    pub fn validate(&self) -> Result<()> {
        CompressWeightsMode::from_bits(self.bits, self.sym)?;
        if !(0.0..=1.0).contains(&self.ratio) {
            return Err(CuantizarError::ConfigValue {
                field: "ratio".into(),
                message: format!("ratio {} is outside [0, 1]", self.ratio),
                suggestion: "Use a fraction of layers, e.g. 0.8".into(),
            });
        }
        if self.group_size == Some(0) {
            return Err(CuantizarError::ConfigValue {
                field: "group_size".into(),
                message: "group size must be positive".into(),
                suggestion: "Use a positive group width, or omit for per-row quantization".into(),
            });
        }
        Ok(())
    }

    /// Compression mode implied by bits and symmetry.
    pub fn mode(&self) -> Result<CompressWeightsMode> {
        CompressWeightsMode::from_bits(self.bits, self.sym)
    }

    /// Set the compression ratio.
    pub fn with_ratio(mut self, ratio: f32) -> Self {
        self.ratio = ratio;
        self
    }

    /// Set the group size.
    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = Some(group_size);
        self
    }

    /// Include embeddings and the final projection in low-bit compression.
    pub fn with_all_layers(mut self, all_layers: bool) -> Self {
        self.all_layers = all_layers;
        self
    }

    /// Set the sensitivity metric.
    pub fn with_sensitivity_metric(mut self, metric: SensitivityMetric) -> Self {
        self.sensitivity_metric = Some(metric);
        self
    }

    /// Return a new configuration with the given ignored scope.
    pub fn with_ignored_scope(mut self, scope: IgnoredScope) -> Self {
        self.ignored_scope = Some(scope);
        self
    }

    /// Set the calibration dataset reference.
    pub fn with_dataset(mut self, dataset: DatasetRef) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Set the tokenizer identifier.
    pub fn with_tokenizer(mut self, tokenizer: impl Into<String>) -> Self {
        self.tokenizer = Some(tokenizer.into());
        self
    }

    /// Set the sample-count cap.
    pub fn with_num_samples(mut self, n: usize) -> Self {
        self.num_samples = Some(n);
        self
    }

    /// The ignored scope, or an empty one.
    pub fn ignored_scope_or_default(&self) -> IgnoredScope {
        self.ignored_scope.clone().unwrap_or_default()
    }
}
