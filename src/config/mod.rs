//! Quantization configuration records.
//!
//! Configurations are immutable once built: the hybrid policy derives its
//! per-pass variants through `with_*` overrides producing new values, never
//! by mutating a shared configuration.

mod quantize;
mod scope;
mod weight;

pub use quantize::{ModelArchitecture, QuantizeConfig};
pub use scope::{IgnoredScope, ScopeMatcher};
pub use weight::{
    CompressWeightsMode, DatasetRef, SensitivityMetric, WeightCompressionConfig,
    DEFAULT_COMPRESSION_SAMPLES,
};
