// ============================================================
// Layer 4 — Tensor Batcher
// ============================================================
// Stacks a slice of Samples into one TensorBatch.
//
// How batching works here:
//   Input:  N Samples, each with K positional fields
//   Output: TensorBatch with K input tensors, each [N, len_k]
//
//   Field k of every sample is flattened row after row and
//   reshaped: [s1_f1, s1_f2, ..., sN_fL] → [N, L]
//
// Nothing is padded here: every sample must already carry the
// same field count, field kinds and field lengths, otherwise the
// batch is rejected with a RaggedField error naming the slot.
//
// Targets are all-or-nothing: a batch where every sample has a
// class index gets one Int tensor [N]; a batch where none has
// one gets no target tensor at all.
//
// The Burn Batcher output is a Result, so a ragged batch reaches
// the training loop as an error item instead of a panic inside
// the DataLoader.

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::domain::sample::{Field, Sample};
use crate::ml::error::ModelError;
use crate::ml::value::DynTensor;

// ─── TensorBatch ──────────────────────────────────────────────────────────────
/// Input tensors plus optional targets, batch size first.
#[derive(Debug, Clone)]
pub struct TensorBatch<B: Backend> {
    pub data:   Vec<DynTensor<B>>,
    pub target: Vec<DynTensor<B>>,
}

impl<B: Backend> TensorBatch<B> {
    /// Rows in the batch, taken from the first input.
    pub fn len(&self) -> usize {
        self.data.first().map_or(0, DynTensor::batch_len)
    }
}

// ─── TensorBatcher ────────────────────────────────────────────────────────────
/// What the DataLoader yields per batch.
pub type BatchResult<B> = Result<TensorBatch<B>, ModelError>;

#[derive(Clone, Debug, Default)]
pub struct TensorBatcher;

impl TensorBatcher {
    /// Stack `items` into one batch on `device`.
    pub fn stack<B: Backend>(&self, items: &[Sample], device: &B::Device) -> BatchResult<B> {
        let first = items
            .first()
            .ok_or_else(|| ModelError::Data("cannot batch zero samples".to_string()))?;
        let rows  = items.len();

        let mut data = Vec::with_capacity(first.inputs.len());
        for (slot, head) in first.inputs.iter().enumerate() {
            let cols = head.len();
            for s in items {
                let field = s.inputs.get(slot).ok_or_else(|| ModelError::RaggedField {
                    slot,
                    reason: format!("sample '{}' has only {} inputs", s.uri, s.inputs.len()),
                })?;
                if field.kind() != head.kind() || field.len() != cols {
                    return Err(ModelError::RaggedField {
                        slot,
                        reason: format!(
                            "sample '{}' has {} x {}, expected {} x {}",
                            s.uri, field.kind(), field.len(), head.kind(), cols
                        ),
                    });
                }
            }

            let tensor = match head {
                Field::Tokens(_) => {
                    let flat: Vec<i64> = items
                        .iter()
                        .flat_map(|s| match &s.inputs[slot] {
                            Field::Tokens(v) => v.clone(),
                            Field::Features(_) => Vec::new(),
                        })
                        .collect();
                    DynTensor::tokens(flat, rows, cols, device)
                }
                Field::Features(_) => {
                    let flat: Vec<f32> = items
                        .iter()
                        .flat_map(|s| match &s.inputs[slot] {
                            Field::Features(v) => v.clone(),
                            Field::Tokens(_) => Vec::new(),
                        })
                        .collect();
                    DynTensor::features(flat, rows, cols, device)
                }
            };
            data.push(tensor);
        }

        if let Some(extra) = items.iter().find(|s| s.inputs.len() != first.inputs.len()) {
            return Err(ModelError::RaggedField {
                slot:   first.inputs.len(),
                reason: format!("sample '{}' has {} inputs, expected {}", extra.uri, extra.inputs.len(), first.inputs.len()),
            });
        }

        let labelled = items.iter().filter(|s| s.target.is_some()).count();
        let target = match labelled {
            0 => Vec::new(),
            n if n == rows => {
                let labels = items.iter().filter_map(|s| s.target).map(|t| t as i64).collect();
                vec![DynTensor::labels(labels, device)]
            }
            n => {
                return Err(ModelError::Data(format!(
                    "batch mixes labelled and unlabelled samples ({n} of {rows} labelled)"
                )))
            }
        };

        tracing::debug!("Batched {} samples into {} input tensors", rows, data.len());
        Ok(TensorBatch { data, target })
    }
}

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
impl<B: Backend> Batcher<B, Sample, BatchResult<B>> for TensorBatcher {
    fn batch(&self, items: Vec<Sample>, device: &B::Device) -> BatchResult<B> {
        self.stack(&items, device)
    }
}
