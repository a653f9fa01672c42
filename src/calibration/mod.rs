//! Calibration data pipeline.
//!
//! Builds a reproducible, shuffled, column-filtered sample stream for
//! calibrating activation ranges:
//! - [`CalibrationDataset`]: named-column samples with seeded
//!   shuffle-then-take subsetting
//! - [`CalibrationLoader`]: batched loader with a seeded sampling order,
//!   partial batches kept, and signature-based column filtering
//! - [`InferRequestRecorder`]: captures real runtime inputs by intercepting
//!   inference calls during a short generation run

mod capture;
mod dataset;
mod loader;

pub use capture::{InferRequestRecorder, InferenceRunner, DEFAULT_CAPTURE_BUDGET};
pub use dataset::{
    build_calibration_dataset, CalibrationDataset, CalibrationDatasetRequest, Preprocess,
    SampleBatch, TensorData,
};
pub use loader::{CalibrationLoader, CalibrationLoaderConfig, LoadedCalibration};
