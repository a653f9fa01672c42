//! Error types with actionable diagnostics.
//!
//! All errors include contextual information to help users resolve issues
//! without needing to consult external documentation. Validation errors are
//! raised before any side effect occurs; there is no partial-success state.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cuantizar operations.
pub type Result<T> = std::result::Result<T, CuantizarError>;

/// Errors that can occur while preparing or running a quantization pass.
#[derive(Error, Debug)]
pub enum CuantizarError {
    /// No save directory was given for the quantized model.
    #[error("`save_directory` needs to be specified\n  → Pass the directory where the quantized model should be saved")]
    MissingSaveDirectory,

    /// Full quantization was requested without calibration data.
    #[error("`calibration_dataset` is needed to compute the activations range during the calibration step and was not provided\n  → Provide a calibration dataset, or set `weights_only` to true to only compress weights")]
    MissingCalibrationDataset,

    /// A configuration value is invalid.
    #[error("Invalid configuration value for '{field}': {message}\n  → {suggestion}")]
    ConfigValue { field: String, message: String, suggestion: String },

    /// A configuration document could not be parsed.
    #[error("Invalid quantization configuration: {message}\n  → Check the configuration fields against the documented schema")]
    ConfigParsing { message: String },

    /// The model task could not be inferred and was not specified.
    #[error("The task defining the model topology could not be extracted and needs to be specified for the export\n  → Pass an explicit task such as \"text-generation\" or \"text-classification\"")]
    TaskInferenceFailed { model_id: String },

    /// The requested task is not supported by post-training quantization.
    #[error("{task} models are currently not supported for post-training static quantization")]
    UnsupportedTask { task: String },

    /// The given model artifact is not something this crate can quantize.
    #[error("Unsupported model artifact: {reason}\n  → Provide a compiled runtime graph or a trainable model")]
    UnsupportedModel { reason: String },

    /// Export to the intermediate graph representation failed.
    #[error("Model export failed: {message}")]
    ExportFailed { message: String },

    /// The compression engine rejected the request.
    #[error("Compression engine error: {message}")]
    Engine { message: String },

    /// A named calibration dataset could not be materialized.
    #[error("Failed to materialize calibration dataset '{name}': {message}\n  → Check the dataset name and that a dataset provider and tokenizer are available")]
    DatasetMaterialization { name: String, message: String },

    /// IO error with context.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Graph construction or traversal invariant violation.
    #[error("Invalid model graph: {message}")]
    InvalidGraph { message: String },

    /// Model file not found.
    #[error("Model file not found: {path}\n  → Check the path to the serialized graph artifact")]
    ModelNotFound { path: PathBuf },
}

impl CuantizarError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Check if this error is user-recoverable.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::MissingSaveDirectory
                | Self::MissingCalibrationDataset
                | Self::ConfigValue { .. }
                | Self::ConfigParsing { .. }
                | Self::TaskInferenceFailed { .. }
                | Self::UnsupportedTask { .. }
                | Self::UnsupportedModel { .. }
                | Self::ModelNotFound { .. }
        )
    }

    /// Get the error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSaveDirectory => "Q001",
            Self::MissingCalibrationDataset => "Q002",
            Self::ConfigValue { .. } => "Q003",
            Self::ConfigParsing { .. } => "Q004",
            Self::TaskInferenceFailed { .. } => "Q010",
            Self::UnsupportedTask { .. } => "Q011",
            Self::UnsupportedModel { .. } => "Q012",
            Self::ExportFailed { .. } => "Q020",
            Self::Engine { .. } => "Q021",
            Self::DatasetMaterialization { .. } => "Q022",
            Self::Io { .. } => "Q050",
            Self::Serialization { .. } => "Q051",
            Self::InvalidGraph { .. } => "Q040",
            Self::ModelNotFound { .. } => "Q041",
        }
    }
}
