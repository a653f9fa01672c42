//! Operation kind, element type and tensor payload definitions.

use serde::{Deserialize, Serialize};

/// Operation type tag.
///
/// A closed set: the transparent-op allow-list of the constant resolver and
/// the classifier rules dispatch on this enum rather than on open-ended
/// string comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Immutable tensor value with no inputs.
    Constant,
    /// Graph input placeholder.
    Parameter,
    /// Matrix multiplication.
    MatMul,
    /// Indexed lookup into a table (embedding-style when the table is a
    /// floating-point constant).
    Gather,
    /// Element-type cast.
    Convert,
    /// Shape change without data change.
    Reshape,
    /// Simulated quantization inserted during calibration.
    FakeQuantize,
    /// Spatial convolution.
    Convolution,
    /// Elementwise addition.
    Add,
    /// Elementwise multiplication.
    Multiply,
    /// Softmax normalization.
    Softmax,
    /// Graph output marker.
    Result,
}

impl OpKind {
    /// Stable name used in ignored-scope type matching and artifacts.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Constant => "Constant",
            OpKind::Parameter => "Parameter",
            OpKind::MatMul => "MatMul",
            OpKind::Gather => "Gather",
            OpKind::Convert => "Convert",
            OpKind::Reshape => "Reshape",
            OpKind::FakeQuantize => "FakeQuantize",
            OpKind::Convolution => "Convolution",
            OpKind::Add => "Add",
            OpKind::Multiply => "Multiply",
            OpKind::Softmax => "Softmax",
            OpKind::Result => "Result",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Element type tag of a produced value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F16,
    F32,
    F64,
    I8,
    I32,
    I64,
    U8,
}

impl ElementType {
    /// Floating-point tags admit embedding classification.
    pub fn is_float(&self) -> bool {
        matches!(self, ElementType::F16 | ElementType::F32 | ElementType::F64)
    }
}

/// Descriptor of one operation output value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    /// Element type of the produced tensor.
    pub element_type: ElementType,
    /// Static shape.
    pub shape: Vec<usize>,
}

impl ValueInfo {
    /// Create a value descriptor.
    pub fn new(element_type: ElementType, shape: Vec<usize>) -> Self {
        Self { element_type, shape }
    }
}

/// An integer-quantized tensor with per-group affine parameters.
///
/// `data` holds one signed value per element regardless of bit width; 4-bit
/// values are stored widened but clamped to their 4-bit range. Scales and
/// zero-points travel with the data so a consumer can dequantize with
/// `(q - zero_point) * scale` per group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizedTensor {
    /// Bit width (8 or 4).
    pub bits: u8,
    /// Original tensor shape.
    pub shape: Vec<usize>,
    /// Group width along the innermost axis; one group spanning the whole
    /// axis when quantized per row.
    pub group_size: usize,
    /// Quantized values, row-major.
    pub data: Vec<i8>,
    /// One scale per group.
    pub scales: Vec<f32>,
    /// One zero-point per group (all zero for symmetric quantization).
    pub zero_points: Vec<i32>,
}

impl QuantizedTensor {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Approximate storage footprint in bytes (packed data + parameters).
    pub fn memory_bytes(&self) -> usize {
        let data_bytes = if self.bits == 4 { self.data.len().div_ceil(2) } else { self.data.len() };
        data_bytes + self.scales.len() * 4 + self.zero_points.len() * 4
    }

    /// Dequantize a single element by flat index.
    pub fn dequantize_at(&self, index: usize) -> f32 {
        let group = index / self.group_size.max(1);
        let scale = self.scales.get(group).copied().unwrap_or(1.0);
        let zp = self.zero_points.get(group).copied().unwrap_or(0);
        (f32::from(self.data[index]) - zp as f32) * scale
    }
}

/// Payload of a constant operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConstantValue {
    /// Dense float payload.
    F32 { shape: Vec<usize>, data: Vec<f32> },
    /// Dense integer payload (e.g. index tables).
    I64 { shape: Vec<usize>, data: Vec<i64> },
    /// Integer-quantized payload with attached affine parameters.
    Quantized(QuantizedTensor),
}

impl ConstantValue {
    /// Element type tag of the payload.
    pub fn element_type(&self) -> ElementType {
        match self {
            ConstantValue::F32 { .. } => ElementType::F32,
            ConstantValue::I64 { .. } => ElementType::I64,
            ConstantValue::Quantized(_) => ElementType::I8,
        }
    }

    /// Tensor shape of the payload.
    pub fn shape(&self) -> &[usize] {
        match self {
            ConstantValue::F32 { shape, .. } => shape,
            ConstantValue::I64 { shape, .. } => shape,
            ConstantValue::Quantized(q) => &q.shape,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ConstantValue::F32 { data, .. } => data.len(),
            ConstantValue::I64 { data, .. } => data.len(),
            ConstantValue::Quantized(q) => q.len(),
        }
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Record of a weight-compression transform applied to an operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightQuantRecord {
    /// Bit width the weight constant was compressed to.
    pub bits: u8,
    /// Whether the compression was symmetric.
    pub symmetric: bool,
}

/// Record of activation quantization applied to an operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivationQuantRecord {
    /// Calibrated activation scale.
    pub scale: f32,
    /// Calibrated activation zero-point.
    pub zero_point: i32,
    /// Whether activation smoothing was applied before quantization.
    pub smoothed: bool,
}
