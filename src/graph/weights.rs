//! Weight-operation classification.
//!
//! Scans a model graph and names every operation whose output depends on a
//! learned weight tensor: matrix multiplies with a constant operand and
//! embedding-style lookups over a floating-point constant table. The result
//! feeds the hybrid quantization policy as an inclusion/exclusion list.

use std::collections::BTreeSet;

use crate::graph::model::{ModelGraph, OpId};
use crate::graph::op::OpKind;
use crate::graph::resolver::resolve_constant;

/// Check whether a `Gather` is an embedding lookup.
///
/// The table input (port 0) must carry a floating-point element type AND a
/// constant must be resolvable from that port. The second condition nearly
/// always holds once the first does; both are kept as independent checks on
/// purpose.
pub fn is_embedding(graph: &ModelGraph, id: OpId) -> bool {
    let Some(info) = graph.input_value_info(id, 0) else {
        return false;
    };
    if !info.element_type.is_float() {
        return false;
    }
    resolve_constant(graph, id, 0).is_some()
}

/// Collect the friendly names of every weight-bearing operation.
///
/// A `MatMul` is weight-bearing when either operand traces back to a
/// constant; a `Gather` when it classifies as an embedding. All other kinds
/// are ignored. The graph is not mutated; the set is rebuilt from scratch
/// per call.
pub fn collect_weight_ops(graph: &ModelGraph) -> BTreeSet<String> {
    let mut ops_with_weights = BTreeSet::new();
    for (id, op) in graph.ops() {
        match op.kind {
            OpKind::MatMul => {
                let const_0 = resolve_constant(graph, id, 0);
                let const_1 = resolve_constant(graph, id, 1);
                if const_0.is_some() || const_1.is_some() {
                    ops_with_weights.insert(op.name.clone());
                }
            }
            OpKind::Gather if is_embedding(graph, id) => {
                ops_with_weights.insert(op.name.clone());
            }
            _ => {}
        }
    }
    ops_with_weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::InputEdge;
    use crate::graph::op::{ConstantValue, ElementType, ValueInfo};

    fn f32_const(g: &mut ModelGraph, name: &str, data: Vec<f32>) -> OpId {
        let n = data.len();
        g.add_constant(name, ConstantValue::F32 { shape: vec![n], data }).unwrap()
    }

    fn i64_const(g: &mut ModelGraph, name: &str, data: Vec<i64>) -> OpId {
        let n = data.len();
        g.add_constant(name, ConstantValue::I64 { shape: vec![n], data }).unwrap()
    }

    fn param(g: &mut ModelGraph, name: &str, ty: ElementType) -> OpId {
        g.add_op(OpKind::Parameter, name, vec![], vec![ValueInfo::new(ty, vec![2])]).unwrap()
    }

    #[test]
    fn test_matmul_and_float_gather_classified() {
        let mut g = ModelGraph::new();
        let w = f32_const(&mut g, "proj.weight", vec![1.0, 2.0]);
        let table = f32_const(&mut g, "wte.weight", vec![0.5, 0.25]);
        let x = param(&mut g, "x", ElementType::F32);
        let ids = param(&mut g, "input_ids", ElementType::I64);
        g.add_op(
            OpKind::MatMul,
            "proj",
            vec![InputEdge::new(x, 0), InputEdge::new(w, 0)],
            vec![ValueInfo::new(ElementType::F32, vec![2])],
        )
        .unwrap();
        g.add_op(
            OpKind::Gather,
            "wte",
            vec![InputEdge::new(table, 0), InputEdge::new(ids, 0)],
            vec![ValueInfo::new(ElementType::F32, vec![2])],
        )
        .unwrap();

        let ops = collect_weight_ops(&g);
        let expected: BTreeSet<String> = ["proj".to_string(), "wte".to_string()].into();
        assert_eq!(ops, expected, "exactly the MatMul and the float Gather must classify");
    }

    #[test]
    fn test_integer_gather_table_excluded() {
        let mut g = ModelGraph::new();
        let table = i64_const(&mut g, "positions", vec![0, 1, 2]);
        let ids = param(&mut g, "input_ids", ElementType::I64);
        g.add_op(
            OpKind::Gather,
            "position_lookup",
            vec![InputEdge::new(table, 0), InputEdge::new(ids, 0)],
            vec![ValueInfo::new(ElementType::I64, vec![2])],
        )
        .unwrap();

        assert!(
            collect_weight_ops(&g).is_empty(),
            "a Gather over an integer table is not an embedding"
        );
    }

    #[test]
    fn test_matmul_either_operand_counts() {
        let mut g = ModelGraph::new();
        let w = f32_const(&mut g, "w", vec![1.0]);
        let x = param(&mut g, "x", ElementType::F32);
        g.add_op(
            OpKind::MatMul,
            "mm_lhs",
            vec![InputEdge::new(w, 0), InputEdge::new(x, 0)],
            vec![ValueInfo::new(ElementType::F32, vec![1])],
        )
        .unwrap();
        g.add_op(
            OpKind::MatMul,
            "mm_rhs",
            vec![InputEdge::new(x, 0), InputEdge::new(w, 0)],
            vec![ValueInfo::new(ElementType::F32, vec![1])],
        )
        .unwrap();

        let ops = collect_weight_ops(&g);
        assert!(ops.contains("mm_lhs"));
        assert!(ops.contains("mm_rhs"));
    }

    #[test]
    fn test_activation_matmul_excluded() {
        // Both operands are runtime values: attention-score style MatMul.
        let mut g = ModelGraph::new();
        let q = param(&mut g, "q", ElementType::F32);
        let k = param(&mut g, "k", ElementType::F32);
        g.add_op(
            OpKind::MatMul,
            "scores",
            vec![InputEdge::new(q, 0), InputEdge::new(k, 0)],
            vec![ValueInfo::new(ElementType::F32, vec![2])],
        )
        .unwrap();

        assert!(collect_weight_ops(&g).is_empty());
    }

    #[test]
    fn test_weight_behind_transparent_chain_classified() {
        let mut g = ModelGraph::new();
        let w = f32_const(&mut g, "w", vec![1.0, 2.0]);
        let cast = g
            .add_op(
                OpKind::Convert,
                "cast",
                vec![InputEdge::new(w, 0)],
                vec![ValueInfo::new(ElementType::F32, vec![2])],
            )
            .unwrap();
        let x = param(&mut g, "x", ElementType::F32);
        g.add_op(
            OpKind::MatMul,
            "proj",
            vec![InputEdge::new(x, 0), InputEdge::new(cast, 0)],
            vec![ValueInfo::new(ElementType::F32, vec![2])],
        )
        .unwrap();

        assert!(collect_weight_ops(&g).contains("proj"));
    }

    #[test]
    fn test_f16_declared_table_classifies() {
        let mut g = ModelGraph::new();
        let table = g
            .add_constant_typed(
                "wte.weight",
                ConstantValue::F32 { shape: vec![4], data: vec![0.1, 0.2, 0.3, 0.4] },
                ElementType::F16,
            )
            .unwrap();
        let ids = param(&mut g, "input_ids", ElementType::I64);
        g.add_op(
            OpKind::Gather,
            "wte",
            vec![InputEdge::new(table, 0), InputEdge::new(ids, 0)],
            vec![ValueInfo::new(ElementType::F16, vec![2])],
        )
        .unwrap();

        assert!(collect_weight_ops(&g).contains("wte"));
    }

    #[test]
    fn test_other_kinds_ignored() {
        let mut g = ModelGraph::new();
        let w = f32_const(&mut g, "bias", vec![1.0]);
        let x = param(&mut g, "x", ElementType::F32);
        g.add_op(
            OpKind::Add,
            "bias_add",
            vec![InputEdge::new(x, 0), InputEdge::new(w, 0)],
            vec![ValueInfo::new(ElementType::F32, vec![1])],
        )
        .unwrap();
        g.add_op(
            OpKind::Convolution,
            "conv",
            vec![InputEdge::new(x, 0), InputEdge::new(w, 0)],
            vec![ValueInfo::new(ElementType::F32, vec![1])],
        )
        .unwrap();

        assert!(
            collect_weight_ops(&g).is_empty(),
            "Add and Convolution never classify as weight-bearing"
        );
    }
}
