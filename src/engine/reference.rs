//! Reference compression engine.
//!
//! An in-crate binding of the [`CompressionEngine`] port that performs real
//! per-row/per-group affine quantization of weight constants and min-max
//! activation calibration. It implements the observable contract of the
//! port — weight payload replacement, quantization records, ignored-scope
//! and smoothing-override handling — while advanced numerics (bias
//! correction, data-aware sensitivity ranking beyond weight error) remain
//! the territory of production engine bindings.

use crate::calibration::{SampleBatch, TensorData};
use crate::config::{ModelArchitecture, ScopeMatcher, SensitivityMetric};
use crate::engine::{CompressionEngine, FullQuantizationRequest, WeightCompressionRequest};
use crate::error::{CuantizarError, Result};
use crate::graph::{
    is_embedding, resolve_constant, ActivationQuantRecord, ConstantValue, ModelGraph, OpId, OpKind,
    QuantizedTensor, WeightQuantRecord,
};

/// Default smoothing alpha for matrix-multiply activations.
const DEFAULT_SMOOTH_ALPHA: f32 = 0.95;

/// Reference engine instance.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceEngine;

impl ReferenceEngine {
    /// Create a reference engine.
    pub fn new() -> Self {
        Self
    }
}

/// One quantizable weight: the consuming operation and its resolved
/// constant.
struct WeightSite {
    op: OpId,
    constant: OpId,
    kind: OpKind,
}

fn collect_weight_sites(graph: &ModelGraph, matcher: &ScopeMatcher) -> Vec<WeightSite> {
    let mut sites = Vec::new();
    for (id, op) in graph.ops() {
        if matcher.matches(&op.name, op.kind) {
            continue;
        }
        let constant = match op.kind {
            OpKind::MatMul => resolve_constant(graph, id, 0).or_else(|| resolve_constant(graph, id, 1)),
            OpKind::Convolution => resolve_constant(graph, id, 1),
            OpKind::Gather if is_embedding(graph, id) => resolve_constant(graph, id, 0),
            _ => None,
        };
        if let Some(constant) = constant {
            sites.push(WeightSite { op: id, constant, kind: op.kind });
        }
    }
    sites
}

/// Affine parameters for an observed value range.
fn affine_params(bits: u8, sym: bool, min_val: f32, max_val: f32) -> (f32, i32) {
    let qmax = (1i32 << (bits - 1)) - 1;
    if sym {
        let max_abs = min_val.abs().max(max_val.abs());
        let scale = if max_abs < 1e-10 { 1e-10 } else { max_abs / qmax as f32 };
        (scale, 0)
    } else {
        let qmin = -(1i32 << (bits - 1));
        let range = max_val - min_val;
        let scale = if range < 1e-10 { 1e-10 } else { range / (qmax - qmin) as f32 };
        let zero_point = (qmin as f32 - min_val / scale).round() as i32;
        (scale, zero_point.clamp(qmin, qmax))
    }
}

fn quant_bounds(bits: u8) -> (i32, i32) {
    let qmax = (1i32 << (bits - 1)) - 1;
    (-(1i32 << (bits - 1)), qmax)
}

/// Quantize a dense payload per group along the innermost axis.
pub(crate) fn quantize_values(
    data: &[f32],
    shape: &[usize],
    bits: u8,
    sym: bool,
    group_size: Option<usize>,
) -> QuantizedTensor {
    let cols = shape.last().copied().unwrap_or(data.len()).max(1);
    let group = group_size.unwrap_or(cols).clamp(1, cols);
    let (qmin, qmax) = quant_bounds(bits);

    let mut out = Vec::with_capacity(data.len());
    let mut scales = Vec::new();
    let mut zero_points = Vec::new();

    for row in data.chunks(cols) {
        for chunk in row.chunks(group) {
            let lo = chunk.iter().copied().fold(f32::INFINITY, f32::min);
            let hi = chunk.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let (scale, zp) = affine_params(bits, sym, lo, hi);
            scales.push(scale);
            zero_points.push(zp);
            for &v in chunk {
                let q = (v / scale).round() as i32 + zp;
                out.push(q.clamp(qmin, qmax) as i8);
            }
        }
    }

    QuantizedTensor {
        bits,
        shape: shape.to_vec(),
        group_size: group,
        data: out,
        scales,
        zero_points,
    }
}

/// Mean squared dequantization error of a payload at the given precision.
fn weight_quantization_error(
    data: &[f32],
    shape: &[usize],
    bits: u8,
    sym: bool,
    group_size: Option<usize>,
) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let q = quantize_values(data, shape, bits, sym, group_size);
    let sum: f32 = data
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let d = v - q.dequantize_at(i);
            d * d
        })
        .sum();
    sum / data.len() as f32
}

impl CompressionEngine for ReferenceEngine {
    fn compress_weights(
        &self,
        mut model: ModelGraph,
        request: &WeightCompressionRequest,
    ) -> Result<ModelGraph> {
        if let Some(metric) = request.sensitivity_metric {
            if metric != SensitivityMetric::WeightQuantizationError {
                return Err(CuantizarError::Engine {
                    message: format!(
                        "the reference engine only supports the weight_quantization_error sensitivity metric, got {metric:?}"
                    ),
                });
            }
        }

        let matcher = request.ignored_scope.matcher()?;
        let mut sites = collect_weight_sites(&model, &matcher);
        if sites.is_empty() {
            return Ok(model);
        }

        let bits = request.mode.bits();
        let sym = request.mode.is_symmetric();

        // Mixed precision: rank sites by quantization error when a metric is
        // given, then keep the configured fraction at the primary precision
        // with the remainder at the 8-bit backup precision.
        if request.sensitivity_metric.is_some() && bits < 8 {
            sites.sort_by(|a, b| {
                let err = |s: &WeightSite| match model.op(s.constant).and_then(|op| op.constant.as_ref()) {
                    Some(ConstantValue::F32 { shape, data }) => {
                        weight_quantization_error(data, shape, bits, sym, request.group_size)
                    }
                    _ => 0.0,
                };
                err(a).partial_cmp(&err(b)).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        let primary_count = if bits < 8 {
            ((request.ratio * sites.len() as f32).ceil() as usize).min(sites.len())
        } else {
            sites.len()
        };

        let last_matmul = sites
            .iter()
            .filter(|s| s.kind == OpKind::MatMul)
            .map(|s| s.op)
            .max();

        for (rank, site) in sites.iter().enumerate() {
            // Embeddings and the final projection stay at 8 bits unless the
            // configuration opts every layer in.
            let backup = rank >= primary_count
                || (bits < 8
                    && !request.all_layers
                    && (site.kind == OpKind::Gather || Some(site.op) == last_matmul));
            let site_bits = if backup { 8 } else { bits };
            let group_size = if site.kind == OpKind::Gather { None } else { request.group_size };

            let payload = model.op(site.constant).and_then(|op| op.constant.clone());
            if let Some(ConstantValue::F32 { shape, data }) = payload {
                let q = quantize_values(&data, &shape, site_bits, sym, group_size);
                if let Some(constant) = model.op_mut(site.constant) {
                    constant.constant = Some(ConstantValue::Quantized(q));
                    constant.outputs[0].element_type = crate::graph::ElementType::I8;
                }
            }
            // A shared constant may already be quantized; the consumer is
            // annotated either way.
            if matches!(
                model.op(site.constant).and_then(|op| op.constant.as_ref()),
                Some(ConstantValue::Quantized(_))
            ) {
                if let Some(op) = model.op_mut(site.op) {
                    op.weight_quant = Some(WeightQuantRecord { bits: site_bits, symmetric: sym });
                }
            }
        }

        Ok(model)
    }

    fn quantize(
        &self,
        mut model: ModelGraph,
        request: &FullQuantizationRequest,
        calibration: &[SampleBatch],
    ) -> Result<ModelGraph> {
        if calibration.is_empty() {
            return Err(CuantizarError::Engine {
                message: "calibration dataset is empty".to_string(),
            });
        }
        let limit = request.subset_size.unwrap_or(calibration.len()).min(calibration.len());
        let batches = &calibration[..limit];

        // Min-max observation over every calibration input value.
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for batch in batches {
            for tensor in batch.columns.values() {
                match tensor {
                    TensorData::F32(a) => {
                        for &v in a.iter() {
                            lo = lo.min(v);
                            hi = hi.max(v);
                        }
                    }
                    TensorData::I64(a) => {
                        for &v in a.iter() {
                            lo = lo.min(v as f32);
                            hi = hi.max(v as f32);
                        }
                    }
                }
            }
        }
        if !lo.is_finite() || !hi.is_finite() {
            return Err(CuantizarError::Engine {
                message: "calibration dataset contains no observable values".to_string(),
            });
        }
        let (scale, zero_point) = affine_params(8, false, lo, hi);

        let matcher = request.ignored_scope.matcher()?;

        // Weights of non-ignored compute ops go to 8 bits alongside their
        // activations.
        for site in collect_weight_sites(&model, &matcher) {
            let payload = model.op(site.constant).and_then(|op| op.constant.clone());
            if let Some(ConstantValue::F32 { shape, data }) = payload {
                let q = quantize_values(&data, &shape, 8, true, None);
                if let Some(constant) = model.op_mut(site.constant) {
                    constant.constant = Some(ConstantValue::Quantized(q));
                    constant.outputs[0].element_type = crate::graph::ElementType::I8;
                }
            }
            if matches!(
                model.op(site.constant).and_then(|op| op.constant.as_ref()),
                Some(ConstantValue::Quantized(_))
            ) {
                if let Some(op) = model.op_mut(site.op) {
                    op.weight_quant = Some(WeightQuantRecord { bits: 8, symmetric: true });
                }
            }
        }

        let targets: Vec<OpId> = model
            .ops()
            .filter(|(_, op)| {
                matches!(
                    op.kind,
                    OpKind::MatMul
                        | OpKind::Convolution
                        | OpKind::Gather
                        | OpKind::Add
                        | OpKind::Multiply
                        | OpKind::Softmax
                )
            })
            .filter(|(_, op)| !matcher.matches(&op.name, op.kind))
            .map(|(id, _)| id)
            .collect();

        for id in targets {
            let Some(op) = model.op_mut(id) else { continue };
            let smoothed = if op.kind == OpKind::MatMul
                && request.model_type == ModelArchitecture::Transformer
            {
                request.smooth_quant.matmul.unwrap_or(DEFAULT_SMOOTH_ALPHA) >= 0.0
            } else {
                false
            };
            op.activation_quant = Some(ActivationQuantRecord { scale, zero_point, smoothed });
        }

        Ok(model)
    }
}
