//! Node-table model graph.
//!
//! The graph owns every operation by id; edges are plain id/port pairs used
//! for backward traversal only. Insertion order doubles as a topological
//! order: an operation may only reference producers already in the table, so
//! the graph is acyclic by construction and cleanup is a table clear.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CuantizarError, Result};
use crate::graph::op::{
    ActivationQuantRecord, ConstantValue, ElementType, OpKind, ValueInfo, WeightQuantRecord,
};

/// Stable identifier of an operation in the node table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub usize);

/// Non-owning reference from a consuming operation to one output of a
/// producing operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEdge {
    /// Producing operation.
    pub producer: OpId,
    /// Output port index on the producer.
    pub port: usize,
}

impl InputEdge {
    /// Reference output `port` of `producer`.
    pub fn new(producer: OpId, port: usize) -> Self {
        Self { producer, port }
    }
}

/// One node record in the table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Operation {
    /// Operation type tag.
    pub kind: OpKind,
    /// Friendly name: a stable, unique, human-readable identifier.
    pub name: String,
    /// Ordered input edges.
    pub inputs: Vec<InputEdge>,
    /// Output value descriptors.
    pub outputs: Vec<ValueInfo>,
    /// Payload, present only for `OpKind::Constant`.
    pub constant: Option<ConstantValue>,
    /// Weight-compression record, written by the engine.
    pub weight_quant: Option<WeightQuantRecord>,
    /// Activation-quantization record, written by the engine.
    pub activation_quant: Option<ActivationQuantRecord>,
}

impl Operation {
    fn new(kind: OpKind, name: String, inputs: Vec<InputEdge>, outputs: Vec<ValueInfo>) -> Self {
        Self {
            kind,
            name,
            inputs,
            outputs,
            constant: None,
            weight_quant: None,
            activation_quant: None,
        }
    }
}

/// Directed acyclic computation graph stored as a node table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelGraph {
    ops: Vec<Operation>,
    #[serde(skip)]
    name_index: HashMap<String, OpId>,
}

impl ModelGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Check if the graph has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Insert a non-constant operation.
    ///
    /// Inputs must reference operations already in the table; the friendly
    /// name must be unique. Both are insertion-time invariants, so a built
    /// graph never needs revalidation before traversal.
    pub fn add_op(
        &mut self,
        kind: OpKind,
        name: impl Into<String>,
        inputs: Vec<InputEdge>,
        outputs: Vec<ValueInfo>,
    ) -> Result<OpId> {
        let name = name.into();
        if kind == OpKind::Constant {
            return Err(CuantizarError::InvalidGraph {
                message: format!("operation '{name}': constants must be added with add_constant"),
            });
        }
        self.check_insertable(&name, &inputs)?;
        let id = OpId(self.ops.len());
        self.ops.push(Operation::new(kind, name.clone(), inputs, outputs));
        self.name_index.insert(name, id);
        Ok(id)
    }

    /// Insert a constant operation holding `value`.
    pub fn add_constant(&mut self, name: impl Into<String>, value: ConstantValue) -> Result<OpId> {
        let name = name.into();
        self.check_insertable(&name, &[])?;
        let info = ValueInfo::new(value.element_type(), value.shape().to_vec());
        let id = OpId(self.ops.len());
        let mut op = Operation::new(OpKind::Constant, name.clone(), Vec::new(), vec![info]);
        op.constant = Some(value);
        self.ops.push(op);
        self.name_index.insert(name, id);
        Ok(id)
    }

    /// Insert a constant with an explicit declared element type (e.g. an f16
    /// weight whose payload is stored widened to f32).
    pub fn add_constant_typed(
        &mut self,
        name: impl Into<String>,
        value: ConstantValue,
        element_type: ElementType,
    ) -> Result<OpId> {
        let id = self.add_constant(name, value)?;
        self.ops[id.0].outputs[0].element_type = element_type;
        Ok(id)
    }

    fn check_insertable(&self, name: &str, inputs: &[InputEdge]) -> Result<()> {
        if self.name_index.contains_key(name) {
            return Err(CuantizarError::InvalidGraph {
                message: format!("duplicate friendly name '{name}'"),
            });
        }
        for edge in inputs {
            if edge.producer.0 >= self.ops.len() {
                return Err(CuantizarError::InvalidGraph {
                    message: format!(
                        "operation '{name}' references producer {} not yet in the graph",
                        edge.producer.0
                    ),
                });
            }
            if self.ops[edge.producer.0].outputs.len() <= edge.port {
                return Err(CuantizarError::InvalidGraph {
                    message: format!(
                        "operation '{name}' references missing output port {} of '{}'",
                        edge.port, self.ops[edge.producer.0].name
                    ),
                });
            }
        }
        Ok(())
    }

    /// Get an operation by id.
    pub fn op(&self, id: OpId) -> Option<&Operation> {
        self.ops.get(id.0)
    }

    /// Get a mutable operation by id.
    pub fn op_mut(&mut self, id: OpId) -> Option<&mut Operation> {
        self.ops.get_mut(id.0)
    }

    /// Look up an operation by friendly name.
    pub fn op_by_name(&self, name: &str) -> Option<(OpId, &Operation)> {
        let id = *self.name_index.get(name)?;
        Some((id, &self.ops[id.0]))
    }

    /// Iterate over all operations in insertion (topological) order.
    pub fn ops(&self) -> impl Iterator<Item = (OpId, &Operation)> {
        self.ops.iter().enumerate().map(|(i, op)| (OpId(i), op))
    }

    /// Producer edge feeding input `port` of `id`.
    pub fn input_source(&self, id: OpId, port: usize) -> Option<InputEdge> {
        self.op(id)?.inputs.get(port).copied()
    }

    /// Value descriptor of the output feeding input `port` of `id`.
    pub fn input_value_info(&self, id: OpId, port: usize) -> Option<&ValueInfo> {
        let edge = self.input_source(id, port)?;
        self.op(edge.producer)?.outputs.get(edge.port)
    }

    /// Names of all `Parameter` operations, in graph order.
    ///
    /// These are the input columns the model's forward computation declares;
    /// the calibration loader filters dataset columns against them.
    pub fn parameter_names(&self) -> Vec<String> {
        self.ops
            .iter()
            .filter(|op| op.kind == OpKind::Parameter)
            .map(|op| op.name.clone())
            .collect()
    }

    /// Rebuild the graph keeping only operations for which `keep` returns
    /// true, rewiring edges through the id remapping.
    ///
    /// Kept operations must not reference dropped producers.
    pub fn retain(&self, keep: impl Fn(OpId, &Operation) -> bool) -> Result<ModelGraph> {
        let mut remap: HashMap<OpId, OpId> = HashMap::new();
        let mut out = ModelGraph::new();
        for (id, op) in self.ops() {
            if !keep(id, op) {
                continue;
            }
            let mut rewired = op.clone();
            for edge in &mut rewired.inputs {
                edge.producer = *remap.get(&edge.producer).ok_or_else(|| {
                    CuantizarError::InvalidGraph {
                        message: format!(
                            "operation '{}' kept but its producer '{}' was dropped",
                            op.name, self.ops[edge.producer.0].name
                        ),
                    }
                })?;
            }
            let new_id = OpId(out.ops.len());
            out.name_index.insert(rewired.name.clone(), new_id);
            out.ops.push(rewired);
            remap.insert(id, new_id);
        }
        Ok(out)
    }

    /// Ids of operations that no other operation consumes.
    pub fn unconsumed(&self) -> Vec<OpId> {
        let mut consumed = vec![false; self.ops.len()];
        for op in &self.ops {
            for edge in &op.inputs {
                consumed[edge.producer.0] = true;
            }
        }
        consumed
            .iter()
            .enumerate()
            .filter(|(_, c)| !**c)
            .map(|(i, _)| OpId(i))
            .collect()
    }

    /// Redirect every edge consuming `from` to consume `to` at the same port
    /// index on the new producer's output 0.
    pub fn rewire_consumers(&mut self, from: OpId, to: OpId) {
        for op in &mut self.ops {
            for edge in &mut op.inputs {
                if edge.producer == from {
                    edge.producer = to;
                    edge.port = 0;
                }
            }
        }
    }

    /// Rebuild the name index after deserialization.
    pub fn reindex(&mut self) -> Result<()> {
        self.name_index.clear();
        for i in 0..self.ops.len() {
            let name = self.ops[i].name.clone();
            if self.name_index.insert(name.clone(), OpId(i)).is_some() {
                return Err(CuantizarError::InvalidGraph {
                    message: format!("duplicate friendly name '{name}' in deserialized graph"),
                });
            }
        }
        Ok(())
    }
}
