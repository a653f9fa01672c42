//! Backward constant resolution.
//!
//! Calibration and compression insert type-cast, fake-quantize and reshape
//! nodes between a learned weight constant and its consuming operation. The
//! resolver sees through exactly those ops and nothing else: following
//! arbitrary computation would misclassify runtime-computed tensors as
//! weights.

use std::collections::VecDeque;

use crate::graph::model::{ModelGraph, OpId};
use crate::graph::op::OpKind;

/// Ops the backward search may propagate through, via their first input.
const TRANSPARENT_OPS: [OpKind; 3] = [OpKind::Convert, OpKind::FakeQuantize, OpKind::Reshape];

/// Find the constant operation feeding input `port` of `op`, or `None`.
///
/// Breadth-first backward search from the port's immediate producer. A
/// `Constant` ends the search immediately (first constant found wins); a
/// node with no inputs dead-ends its path; a transparent op enqueues its
/// port-0 producer; any other kind dead-ends. Pure function of the graph —
/// no side effects, terminates on any finite acyclic graph.
pub fn resolve_constant(graph: &ModelGraph, op: OpId, port: usize) -> Option<OpId> {
    let start = graph.input_source(op, port)?.producer;
    let mut queue = VecDeque::from([start]);

    while let Some(id) = queue.pop_front() {
        let node = graph.op(id)?;
        if node.kind == OpKind::Constant {
            return Some(id);
        }
        if node.inputs.is_empty() {
            continue;
        }
        if TRANSPARENT_OPS.contains(&node.kind) {
            queue.push_back(node.inputs[0].producer);
        }
    }

    None
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

    fn unary(g: &mut ModelGraph, kind: OpKind, name: &str, input: OpId) -> OpId {
        g.add_op(
            kind,
            name,
            vec![InputEdge::new(input, 0)],
            vec![ValueInfo::new(ElementType::F32, vec![2])],
        )
        .unwrap()
    }

    fn param(g: &mut ModelGraph, name: &str) -> OpId {
        g.add_op(OpKind::Parameter, name, vec![], vec![ValueInfo::new(ElementType::F32, vec![2])])
            .unwrap()
    }

    #[test]
    fn test_resolves_through_transparent_chain() {
        // Constant -> Convert -> Reshape -> MatMul(port 0)
        let mut g = ModelGraph::new();
        let c = f32_const(&mut g, "w", vec![1.0, 2.0]);
        let cv = unary(&mut g, OpKind::Convert, "cast", c);
        let rs = unary(&mut g, OpKind::Reshape, "reshape", cv);
        let x = param(&mut g, "x");
        let mm = g
            .add_op(
                OpKind::MatMul,
                "mm",
                vec![InputEdge::new(rs, 0), InputEdge::new(x, 0)],
                vec![ValueInfo::new(ElementType::F32, vec![2])],
            )
            .unwrap();

        assert_eq!(
            resolve_constant(&g, mm, 0),
            Some(c),
            "resolution must see through Convert and Reshape"
        );
    }

    #[test]
    fn test_resolves_through_fake_quantize() {
        let mut g = ModelGraph::new();
        let c = f32_const(&mut g, "w", vec![1.0]);
        let fq = unary(&mut g, OpKind::FakeQuantize, "fq", c);
        let x = param(&mut g, "x");
        let mm = g
            .add_op(
                OpKind::MatMul,
                "mm",
                vec![InputEdge::new(x, 0), InputEdge::new(fq, 0)],
                vec![ValueInfo::new(ElementType::F32, vec![1])],
            )
            .unwrap();

        assert_eq!(resolve_constant(&g, mm, 1), Some(c));
    }

    #[test]
    fn test_disallowed_op_breaks_the_chain() {
        // Constant -> Add -> MatMul: Add is computation, not transparent.
        let mut g = ModelGraph::new();
        let c = f32_const(&mut g, "w", vec![1.0]);
        let x = param(&mut g, "x");
        let add = g
            .add_op(
                OpKind::Add,
                "add",
                vec![InputEdge::new(c, 0), InputEdge::new(x, 0)],
                vec![ValueInfo::new(ElementType::F32, vec![1])],
            )
            .unwrap();
        let mm = g
            .add_op(
                OpKind::MatMul,
                "mm",
                vec![InputEdge::new(add, 0), InputEdge::new(x, 0)],
                vec![ValueInfo::new(ElementType::F32, vec![1])],
            )
            .unwrap();

        assert_eq!(resolve_constant(&g, mm, 0), None);
    }

    #[test]
    fn test_immediate_constant_resolves() {
        let mut g = ModelGraph::new();
        let c = f32_const(&mut g, "w", vec![1.0]);
        let x = param(&mut g, "x");
        let mm = g
            .add_op(
                OpKind::MatMul,
                "mm",
                vec![InputEdge::new(x, 0), InputEdge::new(c, 0)],
                vec![ValueInfo::new(ElementType::F32, vec![1])],
            )
            .unwrap();

        assert_eq!(resolve_constant(&g, mm, 1), Some(c));
        assert_eq!(resolve_constant(&g, mm, 0), None, "parameter input has no constant");
    }

    #[test]
    fn test_parameter_dead_ends_without_propagation() {
        // Parameter -> Reshape -> MatMul: reshape is transparent but the
        // chain ends at a non-constant leaf.
        let mut g = ModelGraph::new();
        let x = param(&mut g, "x");
        let rs = unary(&mut g, OpKind::Reshape, "reshape", x);
        let y = param(&mut g, "y");
        let mm = g
            .add_op(
                OpKind::MatMul,
                "mm",
                vec![InputEdge::new(rs, 0), InputEdge::new(y, 0)],
                vec![ValueInfo::new(ElementType::F32, vec![1])],
            )
            .unwrap();

        assert_eq!(resolve_constant(&g, mm, 0), None);
    }

    #[test]
    fn test_invalid_port_returns_none() {
        let mut g = ModelGraph::new();
        let c = f32_const(&mut g, "w", vec![1.0]);
        let rs = unary(&mut g, OpKind::Reshape, "reshape", c);
        assert_eq!(resolve_constant(&g, rs, 7), None);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            // Resolution terminates and stays within graph bounds for any
            // randomly wired acyclic chain, constant present or not.
            #[test]
            fn prop_resolution_terminates_on_random_chains(
                kinds in proptest::collection::vec(0u8..5, 1..40),
                with_constant in proptest::bool::ANY,
                port in 0usize..3,
            ) {
                let mut g = ModelGraph::new();
                let mut prev = if with_constant {
                    f32_const(&mut g, "w", vec![1.0])
                } else {
                    param(&mut g, "p0")
                };
                for (i, k) in kinds.iter().enumerate() {
                    let kind = match k {
                        0 => OpKind::Convert,
                        1 => OpKind::Reshape,
                        2 => OpKind::FakeQuantize,
                        3 => OpKind::Add,
                        _ => OpKind::Multiply,
                    };
                    prev = unary(&mut g, kind, &format!("n{i}"), prev);
                }
                let x = param(&mut g, "x");
                let mm = g
                    .add_op(
                        OpKind::MatMul,
                        "mm",
                        vec![InputEdge::new(prev, 0), InputEdge::new(x, 0)],
                        vec![ValueInfo::new(ElementType::F32, vec![1])],
                    )
                    .unwrap();

                // Must return (termination); when it does resolve, the
                // resolved node is a constant in the same graph.
                if let Some(id) = resolve_constant(&g, mm, port) {
                    prop_assert_eq!(g.op(id).unwrap().kind, OpKind::Constant);
                }
            }

            // A chain of only transparent ops over a constant always
            // resolves; one disallowed op anywhere in it never does.
            #[test]
            fn prop_transparent_chain_resolves_iff_unbroken(
                transparent in proptest::collection::vec(0u8..3, 0..20),
                break_at in proptest::option::of(0usize..20),
            ) {
                let mut g = ModelGraph::new();
                let c = f32_const(&mut g, "w", vec![1.0]);
                let mut prev = c;
                let mut broken = false;
                for (i, k) in transparent.iter().enumerate() {
                    let kind = if Some(i) == break_at {
                        broken = true;
                        OpKind::Softmax
                    } else {
                        match k {
                            0 => OpKind::Convert,
                            1 => OpKind::Reshape,
                            _ => OpKind::FakeQuantize,
                        }
                    };
                    prev = unary(&mut g, kind, &format!("n{i}"), prev);
                }
                let x = param(&mut g, "x");
                let mm = g
                    .add_op(
                        OpKind::MatMul,
                        "mm",
                        vec![InputEdge::new(prev, 0), InputEdge::new(x, 0)],
                        vec![ValueInfo::new(ElementType::F32, vec![1])],
                    )
                    .unwrap();

                let resolved = resolve_constant(&g, mm, 0);
                if broken {
                    prop_assert_eq!(resolved, None);
                } else {
                    prop_assert_eq!(resolved, Some(c));
                }
            }
        }
    }
}
