// ============================================================
// Layer 5 — Model Errors
// ============================================================
// Typed failures raised by the composed module, the batch
// corruptor and the evaluation/prediction passes.
//
// Upper layers wrap these in anyhow::Error; tests match on
// the variants directly.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Missing or inconsistent option, raised while building the module
    #[error("configuration error: {0}")]
    Config(String),

    /// A graph value was narrowed to a tensor but holds another tag
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found:    &'static str,
    },

    /// `classif_in` points past the end of the produced outputs
    #[error("output slot {index} is out of range ({len} values produced)")]
    OutputIndex { index: usize, len: usize },

    /// Tensor rank or dtype unsuitable for the requested operation
    #[error("unsupported tensor for {op}: got {found}")]
    Rank { op: &'static str, found: &'static str },

    /// Last dimension of a tensor differs from what the layer reads
    #[error("{op} expects width {expected}, got {found}")]
    Width { op: &'static str, expected: usize, found: usize },

    /// Evaluation batch without a target tensor
    #[error("missing label on data while testing")]
    MissingLabel,

    /// Batch has fewer input tensors than the operation reads
    #[error("batch carries {len} input tensors, input #{index} is required")]
    MissingInput { index: usize, len: usize },

    /// Samples of a batch disagree on a field's kind or length
    #[error("input field #{slot} cannot be stacked: {reason}")]
    RaggedField { slot: usize, reason: String },

    /// Malformed traced graph archive
    #[error("invalid traced graph: {0}")]
    Trace(String),

    /// Failure reading tensor data back to the host
    #[error("tensor data error: {0}")]
    Data(String),

    /// Training requested on a dataset with no samples
    #[error("training set is empty")]
    EmptyTrainingSet,
}
