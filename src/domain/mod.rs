// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain structs and traits shared by every other layer:
//
//   sample.rs     — Sample / Field / Corpus
//   measure.rs    — Measure values and EvalRecords
//   prediction.rs — one ranked prediction per example
//   traits.rs     — InputConnector, Measurer, LabelLookup,
//                   OutputConnector
//
// No Burn types and no file I/O here.
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Samples and the loaded corpus
pub mod sample;

// Measurement values handed between evaluator and output
pub mod measure;

// Ranked per-example predictions
pub mod prediction;

// Collaborator contracts implemented in Layers 4 and 6
pub mod traits;
