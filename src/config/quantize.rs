//! Top-level quantization configuration.

use serde::{Deserialize, Serialize};

use crate::config::scope::IgnoredScope;
use crate::config::weight::WeightCompressionConfig;
use crate::error::{CuantizarError, Result};

/// Model architecture hint passed to the engine for full quantization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelArchitecture {
    /// Attention-based architectures; enables transformer-specific engine
    /// heuristics.
    #[default]
    Transformer,
    /// No architecture-specific handling.
    Generic,
}

/// Configuration consumed by one quantization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizeConfig {
    /// Weight-compression settings; presence of a dataset here selects the
    /// hybrid strategy for non-weights-only runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_config: Option<WeightCompressionConfig>,
    /// Architecture hint for the engine.
    #[serde(default)]
    pub model_type: ModelArchitecture,
    /// Use the fast bias-correction variant during full quantization.
    #[serde(default = "default_true")]
    pub fast_bias_correction: bool,
    /// Calibration subset size for full quantization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset_size: Option<usize>,
    /// Operations exempt from full quantization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored_scope: Option<IgnoredScope>,
}

fn default_true() -> bool {
    true
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            weight_config: None,
            model_type: ModelArchitecture::Transformer,
            fast_bias_correction: true,
            subset_size: None,
            ignored_scope: None,
        }
    }
}

impl QuantizeConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a JSON dict.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| CuantizarError::ConfigParsing { message: e.to_string() })?;
        if let Some(wc) = &config.weight_config {
            wc.validate()?;
        }
        Ok(config)
    }

    /// Set the weight-compression settings.
    pub fn with_weight_config(mut self, weight_config: WeightCompressionConfig) -> Self {
        self.weight_config = Some(weight_config);
        self
    }

    /// Set the architecture hint.
    pub fn with_model_type(mut self, model_type: ModelArchitecture) -> Self {
        self.model_type = model_type;
        self
    }

    /// Toggle fast bias correction.
    pub fn with_fast_bias_correction(mut self, enabled: bool) -> Self {
        self.fast_bias_correction = enabled;
        self
    }

    /// Set the calibration subset size.
    pub fn with_subset_size(mut self, n: usize) -> Self {
        self.subset_size = Some(n);
        self
    }

    /// Set the ignored scope for full quantization.
    pub fn with_ignored_scope(mut self, scope: IgnoredScope) -> Self {
        self.ignored_scope = Some(scope);
        self
    }
}
