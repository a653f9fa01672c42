//! Final graph-compaction pass.
//!
//! Calibration leaves simulated-quantization nodes over weight constants in
//! the graph. Before serialization those chains are folded: the constant
//! payload is quantized in place, consumers are rewired straight to the
//! constant, and orphaned nodes are pruned. The persisted artifact carries
//! low-precision weights instead of float weights plus FakeQuantize ops.

use crate::engine::quantize_values;
use crate::error::Result;
use crate::graph::{ConstantValue, ElementType, ModelGraph, OpKind};

/// Fold FakeQuantize-over-Constant chains into quantized constants and
/// prune the nodes left dangling.
pub fn fold_quantize_constants(graph: ModelGraph) -> Result<ModelGraph> {
    let mut graph = graph;

    // Fold: quantize each constant feeding a FakeQuantize, then bypass the
    // FakeQuantize node.
    let folds: Vec<_> = graph
        .ops()
        .filter(|(_, op)| op.kind == OpKind::FakeQuantize)
        .filter_map(|(id, op)| {
            let producer = op.inputs.first()?.producer;
            let source = graph.op(producer)?;
            match &source.constant {
                Some(ConstantValue::F32 { .. }) => Some((id, producer)),
                _ => None,
            }
        })
        .collect();

    for (fq, constant) in &folds {
        let payload = graph.op(*constant).and_then(|op| op.constant.clone());
        if let Some(ConstantValue::F32 { shape, data }) = payload {
            let q = quantize_values(&data, &shape, 8, true, None);
            if let Some(op) = graph.op_mut(*constant) {
                op.constant = Some(ConstantValue::Quantized(q));
                op.outputs[0].element_type = ElementType::I8;
            }
        }
        graph.rewire_consumers(*fq, *constant);
    }

    // Prune nodes nothing consumes, repeating until stable so a dropped
    // FakeQuantize also releases its parameter constants.
    loop {
        let orphans: Vec<_> = graph
            .unconsumed()
            .into_iter()
            .filter(|id| {
                graph
                    .op(*id)
                    .is_some_and(|op| !matches!(op.kind, OpKind::Result | OpKind::Parameter))
            })
            .collect();
        if orphans.is_empty() {
            return Ok(graph);
        }
        graph = graph.retain(|id, _| !orphans.contains(&id))?;
    }
}
