// ============================================================
// Layer 4 — Restartable Batch Stream
// ============================================================
// The training loop counts optimizer steps, not epochs, so it
// needs a batch source it can re-open whenever a pass over the
// dataset runs dry:
//
//   loop {
//       for batch in stream.pass() { ... }   // one epoch
//   }
//
// Each pass is a fresh `iter()` over a Burn DataLoader built
// from the TensorBatcher: samples in order, batch_size at a
// time, the last batch possibly shorter. A batch that cannot be
// stacked arrives as an Err item.
//
// Reference: Burn Book §4 (DataLoader)

use std::sync::Arc;

use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    prelude::*,
};

use crate::data::batcher::{BatchResult, TensorBatcher};
use crate::data::dataset::SampleDataset;

#[derive(Clone)]
pub struct BatchStream<B: Backend> {
    loader: Arc<dyn DataLoader<B, BatchResult<B>>>,
}

impl<B: Backend> BatchStream<B> {
    /// Loader over `dataset` producing tensors on `device`.
    pub fn new(dataset: SampleDataset, batch_size: usize, device: &B::Device) -> Self {
        tracing::debug!("Batch stream over {} samples, {} per batch", dataset.len(), batch_size.max(1));
        let loader = DataLoaderBuilder::new(TensorBatcher)
            .batch_size(batch_size.max(1))
            .set_device(device.clone())
            .build(dataset);
        Self { loader }
    }

    /// Samples per pass.
    pub fn len(&self) -> usize {
        self.loader.num_items()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One fresh pass over the dataset.
    pub fn pass(&self) -> impl Iterator<Item = BatchResult<B>> + '_ {
        self.loader.iter()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::{Field, Sample};
    use crate::ml::error::ModelError;

    type TestBackend = burn::backend::NdArray;

    fn stream(n: i64, batch_size: usize) -> BatchStream<TestBackend> {
        let samples = (0..n).map(|i| Sample::new(format!("{i}"), vec![Field::Tokens(vec![i])], None)).collect();
        BatchStream::new(SampleDataset::new(samples), batch_size, &Default::default())
    }

    #[test]
    fn test_pass_sizes() {
        let s = stream(7, 3);
        let sizes: Vec<usize> = s.pass().map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(s.len(), 7);
    }

    #[test]
    fn test_pass_restarts() {
        let s = stream(4, 2);
        assert_eq!(s.pass().count(), 2);
        assert_eq!(s.pass().count(), 2);
    }

    #[test]
    fn test_zero_batch_size_clamped() {
        assert_eq!(stream(3, 0).pass().count(), 3);
    }

    #[test]
    fn test_empty_dataset_yields_nothing() {
        let s = stream(0, 4);
        assert!(s.is_empty());
        assert_eq!(s.pass().count(), 0);
    }

    #[test]
    fn test_ragged_batch_is_an_error_item() {
        let samples = vec![
            Sample::new("a", vec![Field::Tokens(vec![1, 2])], None),
            Sample::new("b", vec![Field::Tokens(vec![3])], None),
        ];
        let s = BatchStream::<TestBackend>::new(SampleDataset::new(samples), 2, &Default::default());
        let items: Vec<_> = s.pass().collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ModelError::RaggedField { slot: 0, .. })));
    }
}
