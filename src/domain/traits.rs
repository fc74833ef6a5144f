// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams between the training core and its collaborators.
// The ml layer only ever sees these traits:
//
//   InputConnector  → JsonlConnector   (samples from disk)
//   Measurer        → SupervisedMeasurer
//   LabelLookup     → CorrespTable     (corresp.txt)
//   OutputConnector → JsonOutput       (prediction payload)

use anyhow::Result;

use crate::domain::measure::{EvalRecords, Measures};
use crate::domain::prediction::PredictionRecord;
use crate::domain::sample::Corpus;

// ─── InputConnector ───────────────────────────────────────────────────────────
/// Any component that turns raw data into train/test samples.
/// Errors raised here reach the caller unchanged.
pub trait InputConnector {
    fn load(&self) -> Result<Corpus>;
}

// ─── Measurer ─────────────────────────────────────────────────────────────────
/// Computes aggregate statistics from per-example predictions.
pub trait Measurer {
    /// `requested` names the measures to emit, e.g. `["acc", "cmfull"]`.
    fn measure(&self, records: &EvalRecords, requested: &[String]) -> Measures;
}

// ─── LabelLookup ──────────────────────────────────────────────────────────────
pub trait LabelLookup {
    /// Human-readable name of class `index`.
    fn label(&self, index: usize) -> String;

    /// Names of the first `nclasses` classes, in index order.
    fn labels(&self, nclasses: usize) -> Vec<String> {
        (0..nclasses).map(|i| self.label(i)).collect()
    }
}

// ─── OutputConnector ──────────────────────────────────────────────────────────
/// Turns ranked predictions into a response payload.
pub trait OutputConnector {
    fn finalize(&self, predictions: &[PredictionRecord]) -> Result<serde_json::Value>;
}
