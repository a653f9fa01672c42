//! Computation graph model and weight-operation analysis.
//!
//! The graph is an explicit node table: every operation lives in the table
//! under a stable [`OpId`], and edges are plain id/port references, never
//! owning pointers. Constant resolution and weight classification are pure
//! backward traversals over this table:
//! - [`resolve_constant`]: find the constant tensor feeding an input port,
//!   seen through type/shape-preserving intermediate ops
//! - [`collect_weight_ops`]: classify the operations carrying learned weights
//!   (matrix multiplies with a constant operand, float embedding lookups)

mod model;
mod op;
mod resolver;
mod weights;

pub use model::{InputEdge, ModelGraph, OpId, Operation};
pub use op::{
    ActivationQuantRecord, ConstantValue, ElementType, OpKind, QuantizedTensor, ValueInfo,
    WeightQuantRecord,
};
pub use resolver::resolve_constant;
pub use weights::{collect_weight_ops, is_embedding};
