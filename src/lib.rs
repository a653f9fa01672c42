//! # cuantizar
//!
//! Post-training quantization orchestration for transformer models on a
//! hardware-accelerated inference runtime.
//!
//! The crate prepares calibration data, drives a compression engine through
//! weight-only or full (weights + activations) quantization, and persists
//! the optimized model graph. Strategy selection is per-run:
//! - **weight-only** compression for LLM footprint reduction
//! - **full static quantization** calibrated on representative inputs
//! - **hybrid** quantization for generative/diffusion-style graphs, pairing
//!   weight compression of matrix multiplies and embeddings with activation
//!   quantization of everything else
//!
//! The hybrid split rests on a backward graph search
//! ([`graph::resolve_constant`]) that traces each operation's input through
//! shape/type-preserving ops to its originating constant, and a classifier
//! ([`graph::collect_weight_ops`]) built on top of it.
//!
//! # Example
//!
//! ```no_run
//! use cuantizar::engine::ReferenceEngine;
//! use cuantizar::graph::ModelGraph;
//! use cuantizar::quantizer::{CompiledModel, QuantizeRequest, QuantizeServices, Quantizer};
//!
//! # fn graph() -> ModelGraph { ModelGraph::new() }
//! let engine = ReferenceEngine::new();
//! let mut quantizer = Quantizer::from_compiled(CompiledModel::new(graph()));
//! quantizer.quantize(
//!     QuantizeRequest::new()
//!         .with_save_directory("./quantized_model")
//!         .weights_only(true),
//!     &QuantizeServices::new(&engine),
//! )?;
//! # Ok::<(), cuantizar::CuantizarError>(())
//! ```

pub mod calibration;
pub mod cli;
pub mod config;
pub mod engine;
mod error;
pub mod graph;
pub mod io;
pub mod policy;
pub mod quantizer;

pub use error::{CuantizarError, Result};
