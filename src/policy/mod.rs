//! Quantization policy selection.
//!
//! Three mutually exclusive run modes:
//! - **weight-only**: compress learned parameters, leave activations in
//!   floating point
//! - **full**: quantize weights and activations, calibrated on
//!   representative inputs
//! - **hybrid**: weight-only for the classified weight-bearing operations,
//!   full quantization for everything else — the fit for generative and
//!   diffusion-style graphs where most parameters sit in matrix multiplies

use ndarray::{ArcArray, IxDyn};

use crate::calibration::{SampleBatch, TensorData};
use crate::config::{
    ModelArchitecture, QuantizeConfig, WeightCompressionConfig, DEFAULT_COMPRESSION_SAMPLES,
};
use crate::engine::{
    CompressionEngine, DatasetProvider, FullQuantizationRequest, SmoothQuantOverrides,
    TextTokenizer, WeightCompressionRequest,
};
use crate::error::{CuantizarError, Result};
use crate::graph::{collect_weight_ops, ModelGraph};

/// Calibration subset size for the full-quantization pass of a hybrid run.
pub const DEFAULT_HYBRID_SUBSET_SIZE: usize = 200;

/// Sequence length used when tokenizing a named compression dataset.
const COMPRESSION_SEQ_LEN: usize = 32;

/// External services the policy layer may need to materialize datasets.
#[derive(Clone, Copy, Default)]
pub struct PolicySupport<'a> {
    /// Dataset service, for named dataset references.
    pub datasets: Option<&'a dyn DatasetProvider>,
    /// Tokenizer, for named dataset references.
    pub tokenizer: Option<&'a dyn TextTokenizer>,
}

/// Apply weight-only compression to the whole graph except the configured
/// ignored scope.
///
/// A named dataset reference is materialized first: raw text is loaded and
/// tokenized to a fixed sequence length, capped at the configured sample
/// count or the 128-sample default.
pub fn weight_only_quantization(
    engine: &dyn CompressionEngine,
    model: ModelGraph,
    config: &WeightCompressionConfig,
    support: &PolicySupport<'_>,
) -> Result<ModelGraph> {
    config.validate()?;

    let dataset = match &config.dataset {
        None => None,
        Some(crate::config::DatasetRef::Samples(samples)) => Some(samples.clone()),
        Some(crate::config::DatasetRef::Named(name)) => {
            Some(materialize_named_dataset(name, config, support)?)
        }
    };

    let request = WeightCompressionRequest {
        mode: config.mode()?,
        ratio: config.ratio,
        group_size: config.group_size,
        all_layers: config.all_layers,
        sensitivity_metric: config.sensitivity_metric,
        ignored_scope: config.ignored_scope_or_default(),
        dataset,
    };
    engine.compress_weights(model, &request)
}

/// Apply full static quantization to the whole graph.
///
/// The model is tagged as a transformer architecture unless overridden,
/// with bias correction enabled by default.
pub fn full_quantization(
    engine: &dyn CompressionEngine,
    model: ModelGraph,
    config: &QuantizeConfig,
    calibration: &[SampleBatch],
) -> Result<ModelGraph> {
    let request = FullQuantizationRequest {
        model_type: config.model_type,
        fast_bias_correction: config.fast_bias_correction,
        ignored_scope: config.ignored_scope.clone().unwrap_or_default(),
        subset_size: config.subset_size,
        smooth_quant: SmoothQuantOverrides::default(),
    };
    engine.quantize(model, &request, calibration)
}

/// Apply hybrid quantization: weights of matrix-multiply and embedding
/// operations are compressed, activations of the remaining operations are
/// quantized.
///
/// The weight-only pass excludes convolutions (they get full quantization
/// instead); the full pass excludes the weight-bearing set so compressed
/// weights are not quantized twice, and disables activation smoothing for
/// matrix multiplies since their weights are already fixed-point.
pub fn hybrid_quantization(
    engine: &dyn CompressionEngine,
    model: ModelGraph,
    config: &WeightCompressionConfig,
    calibration: &[SampleBatch],
    support: &PolicySupport<'_>,
) -> Result<ModelGraph> {
    let ops_to_compress = collect_weight_ops(&model);

    let ptq_scope = config.ignored_scope_or_default().with_added_names(ops_to_compress);
    let wc_config = config
        .clone()
        .with_ignored_scope(config.ignored_scope_or_default().with_added_type("Convolution"));

    let compressed = weight_only_quantization(engine, model, &wc_config, support)?;

    let request = FullQuantizationRequest {
        model_type: ModelArchitecture::Transformer,
        fast_bias_correction: true,
        ignored_scope: ptq_scope,
        subset_size: Some(config.num_samples.unwrap_or(DEFAULT_HYBRID_SUBSET_SIZE)),
        smooth_quant: SmoothQuantOverrides { matmul: Some(-1.0) },
    };
    engine.quantize(compressed, &request, calibration)
}

fn materialize_named_dataset(
    name: &str,
    config: &WeightCompressionConfig,
    support: &PolicySupport<'_>,
) -> Result<Vec<SampleBatch>> {
    let Some(provider) = support.datasets else {
        return Err(CuantizarError::DatasetMaterialization {
            name: name.to_string(),
            message: "no dataset provider available".into(),
        });
    };
    let Some(tokenizer) = support.tokenizer else {
        return Err(CuantizarError::DatasetMaterialization {
            name: name.to_string(),
            message: "no tokenizer available".into(),
        });
    };

    let texts = provider.load_text(name, "train")?;
    let nsamples = config.num_samples.unwrap_or(DEFAULT_COMPRESSION_SAMPLES);

    let samples = texts
        .iter()
        .filter_map(|text| {
            let ids = tokenizer.encode(text, COMPRESSION_SEQ_LEN);
            if ids.is_empty() {
                return None;
            }
            let n = ids.len();
            Some(SampleBatch::new().with_column(
                "input_ids",
                TensorData::I64(ArcArray::from_shape_vec(IxDyn(&[1, n]), ids).ok()?),
            ))
        })
        .take(nsamples)
        .collect();
    Ok(samples)
}
