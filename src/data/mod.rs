// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between sample files on disk and tensor batches
// on the compute device:
//
//   train.jsonl / test.jsonl
//       │
//       ▼
//   JsonlConnector    → parses samples, splits train/test
//       │
//       ▼
//   SampleDataset     → implements Burn's Dataset trait
//       │
//       ▼
//   TensorBatcher     → Burn Batcher stacking each field into one tensor
//       │
//       ▼
//   BatchStream       → Burn DataLoader, one fresh pass per epoch
//
// Reference: Burn Book §4 (Datasets)

/// Reads JSON-lines samples
pub mod loader;

/// Implements Burn's Dataset trait for samples
pub mod dataset;

/// Stacks samples into TensorBatch values
pub mod batcher;

/// Re-openable batch passes for iteration-based training
pub mod stream;

/// Seeded train/test split
pub mod splitter;
