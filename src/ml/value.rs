// ============================================================
// Layer 5 — Runtime-typed Graph Values
// ============================================================
// A traced graph is opaque: depending on how it was traced it
// hands back one tensor, a list of tensors or a tuple. Burn
// tensors carry their rank and kind in the type, so values
// crossing the graph boundary are wrapped twice:
//
//   DynTensor  — one tensor of a supported rank/kind
//   GraphValue — Tensor | List(tensors) | Tuple(values)
//
// Narrowing a GraphValue to a tensor is explicit and fails
// with ModelError::TypeMismatch when another tag is active.

use burn::{
    nn::Linear,
    prelude::*,
    tensor::activation,
};

use crate::ml::error::ModelError;

// ─── DynTensor ────────────────────────────────────────────────────────────────
/// A tensor whose rank and element kind are only known at runtime.
#[derive(Debug, Clone)]
pub enum DynTensor<B: Backend> {
    /// Dense features, e.g. pooled embeddings `[batch, dim]`
    Float2(Tensor<B, 2>),
    /// Sequence features, e.g. token states `[batch, seq, dim]`
    Float3(Tensor<B, 3>),
    /// Class ids `[batch]`
    Int1(Tensor<B, 1, Int>),
    /// Token ids or attention masks `[batch, seq]`
    Int2(Tensor<B, 2, Int>),
}

impl<B: Backend> DynTensor<B> {
    /// Build a `[rows, cols]` token-id tensor from host values.
    pub fn tokens(values: Vec<i64>, rows: usize, cols: usize, device: &B::Device) -> Self {
        let data = TensorData::new(values, [rows, cols]).convert::<B::IntElem>();
        Self::Int2(Tensor::from_data(data, device))
    }

    /// Build a `[rows, cols]` float tensor from host values.
    pub fn features(values: Vec<f32>, rows: usize, cols: usize, device: &B::Device) -> Self {
        let data = TensorData::new(values, [rows, cols]).convert::<B::FloatElem>();
        Self::Float2(Tensor::from_data(data, device))
    }

    /// Build a `[len]` class-id tensor from host values.
    pub fn labels(values: Vec<i64>, device: &B::Device) -> Self {
        let len  = values.len();
        let data = TensorData::new(values, [len]).convert::<B::IntElem>();
        Self::Int1(Tensor::from_data(data, device))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Float2(_) => "float tensor [2d]",
            Self::Float3(_) => "float tensor [3d]",
            Self::Int1(_)   => "int tensor [1d]",
            Self::Int2(_)   => "int tensor [2d]",
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        match self {
            Self::Float2(t) => t.dims().to_vec(),
            Self::Float3(t) => t.dims().to_vec(),
            Self::Int1(t)   => t.dims().to_vec(),
            Self::Int2(t)   => t.dims().to_vec(),
        }
    }

    /// Size of the leading (batch) dimension.
    pub fn batch_len(&self) -> usize {
        self.dims().first().copied().unwrap_or(0)
    }

    pub fn to_device(self, device: &B::Device) -> Self {
        match self {
            Self::Float2(t) => Self::Float2(t.to_device(device)),
            Self::Float3(t) => Self::Float3(t.to_device(device)),
            Self::Int1(t)   => Self::Int1(t.to_device(device)),
            Self::Int2(t)   => Self::Int2(t.to_device(device)),
        }
    }

    /// Run a linear layer over the last dimension.
    pub fn apply_linear(self, head: &Linear<B>) -> Result<Self, ModelError> {
        let [d_in, _] = head.weight.val().dims();
        let width     = self.dims().last().copied().unwrap_or(0);
        if matches!(self, Self::Float2(_) | Self::Float3(_)) && width != d_in {
            return Err(ModelError::Width { op: "linear head", expected: d_in, found: width });
        }
        match self {
            Self::Float2(t) => Ok(Self::Float2(head.forward(t))),
            Self::Float3(t) => Ok(Self::Float3(head.forward(t))),
            other => Err(ModelError::Rank { op: "linear head", found: other.kind() }),
        }
    }

    pub fn into_float2(self) -> Result<Tensor<B, 2>, ModelError> {
        match self {
            Self::Float2(t) => Ok(t),
            other => Err(ModelError::Rank { op: "2d float read", found: other.kind() }),
        }
    }

    pub fn into_float3(self) -> Result<Tensor<B, 3>, ModelError> {
        match self {
            Self::Float3(t) => Ok(t),
            other => Err(ModelError::Rank { op: "3d float read", found: other.kind() }),
        }
    }

    pub fn into_int1(self) -> Result<Tensor<B, 1, Int>, ModelError> {
        match self {
            Self::Int1(t) => Ok(t),
            other => Err(ModelError::Rank { op: "1d int read", found: other.kind() }),
        }
    }

    pub fn into_int2(self) -> Result<Tensor<B, 2, Int>, ModelError> {
        match self {
            Self::Int2(t) => Ok(t),
            other => Err(ModelError::Rank { op: "2d int read", found: other.kind() }),
        }
    }
}

// ─── Host transfers ───────────────────────────────────────────────────────────
/// Copy an integer tensor back to the host as `i64` values (row-major).
pub fn host_ints<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Result<Vec<i64>, ModelError> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| ModelError::Data(format!("{e:?}")))
}

/// Copy a float tensor back to the host as `f32` values (row-major).
pub fn host_floats<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, ModelError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ModelError::Data(format!("{e:?}")))
}

/// Fail with a data error unless every id lies in `0..rows`.
pub fn check_ids<B: Backend, const D: usize>(
    ids:  &Tensor<B, D, Int>,
    rows: usize,
    what: &str,
) -> Result<(), ModelError> {
    let values = host_ints(ids.clone())?;
    match values.iter().find(|&&id| id < 0 || id as u64 >= rows as u64) {
        Some(id) => Err(ModelError::Data(format!("{what} id {id} outside 0..{rows}"))),
        None     => Ok(()),
    }
}

/// Row-wise softmax of a `[batch, classes]` tensor, returned as host rows.
pub fn softmax_rows<B: Backend>(scores: Tensor<B, 2>) -> Result<Vec<Vec<f64>>, ModelError> {
    let [_, classes] = scores.dims();
    let probs = host_floats(activation::softmax(scores, 1))?;
    if classes == 0 {
        return Ok(Vec::new());
    }
    Ok(probs
        .chunks(classes)
        .map(|row| row.iter().map(|&p| p as f64).collect())
        .collect())
}

// ─── GraphValue ───────────────────────────────────────────────────────────────
/// Value exchanged with a traced graph. Exactly one tag is active.
#[derive(Debug, Clone)]
pub enum GraphValue<B: Backend> {
    Tensor(DynTensor<B>),
    List(Vec<DynTensor<B>>),
    Tuple(Vec<GraphValue<B>>),
}

impl<B: Backend> GraphValue<B> {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Tensor(_) => "Tensor",
            Self::List(_)   => "TensorList",
            Self::Tuple(_)  => "Tuple",
        }
    }

    /// Narrow to a tensor, failing with a type error on any other tag.
    pub fn into_tensor(self) -> Result<DynTensor<B>, ModelError> {
        match self {
            Self::Tensor(t) => Ok(t),
            other => Err(ModelError::TypeMismatch { expected: "Tensor", found: other.tag() }),
        }
    }

    /// Flatten one level: list and tuple elements become the sequence,
    /// a single tensor becomes a one-element sequence.
    pub fn into_values(self) -> Vec<GraphValue<B>> {
        match self {
            Self::Tensor(t)   => vec![Self::Tensor(t)],
            Self::List(elems) => elems.into_iter().map(Self::Tensor).collect(),
            Self::Tuple(vals) => vals,
        }
    }
}

impl<B: Backend> From<DynTensor<B>> for GraphValue<B> {
    fn from(t: DynTensor<B>) -> Self {
        Self::Tensor(t)
    }
}
