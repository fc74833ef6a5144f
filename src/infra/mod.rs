// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Concrete collaborators of the training core:
//
//   checkpoint.rs — model repository layout: checkpoint names,
//                   descriptor scan, config.json, clear
//   metrics.rs    — per-iteration measurement log + metrics.csv
//   measures.rs   — SupervisedMeasurer (acc, f1, confusion, ...)
//   corresp.rs    — class labels from corresp.txt
//   output.rs     — JSON prediction / measure payloads
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Model repository and checkpoint naming
pub mod checkpoint;

/// Measurement log and CSV sink
pub mod metrics;

/// Classification measures
pub mod measures;

/// corresp.txt label lookup
pub mod corresp;

/// JSON output connector
pub mod output;
