// ============================================================
// Layer 3 — Evaluation Records and Measures
// ============================================================
// EvalRecords is what the evaluator hands to a Measurer: one
// (target, class probabilities) entry per tested example plus
// run-level metadata. Measures is what comes back, keyed by
// measure name ("acc", "f1", "cmfull", ...).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Measures never folded into the per-iteration training log.
pub const NON_SCALAR_MEASURES: [&str; 3] = ["cmdiag", "cmfull", "labels"];

/// Run metadata echoed by the measurer; the trainer logs these itself.
pub const RUN_MEASURES: [&str; 2] = ["iteration", "train_loss"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measure {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
    Labels(Vec<String>),
}

impl Measure {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Measure::Scalar(v) => Some(*v),
            _ => None,
        }
    }
}

pub type Measures = BTreeMap<String, Measure>;

/// Drop confusion artifacts, run metadata and anything that is not a scalar.
pub fn foldable(measures: &Measures) -> impl Iterator<Item = (&str, f64)> {
    measures
        .iter()
        .filter(|(name, _)| !NON_SCALAR_MEASURES.contains(&name.as_str()))
        .filter(|(name, _)| !RUN_MEASURES.contains(&name.as_str()))
        .filter_map(|(name, m)| m.as_scalar().map(|v| (name.as_str(), v)))
}

/// One tested example.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalEntry {
    pub target: usize,
    pub probs:  Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct EvalRecords {
    pub entries:    Vec<EvalEntry>,
    /// Optimizer steps completed when the evaluation ran
    pub iteration:  usize,
    /// Last emitted training loss
    pub train_loss: f64,
    pub clnames:    Vec<String>,
    pub nclasses:   usize,
    pub tested:     usize,
    /// Mean loss over evaluation batches, masked-LM only
    pub eval_loss:  Option<f64>,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foldable_skips_confusion_labels_and_run_metadata() {
        let mut m = Measures::new();
        m.insert("acc".into(),    Measure::Scalar(0.5));
        m.insert("cmdiag".into(), Measure::Vector(vec![1.0, 0.0]));
        m.insert("cmfull".into(), Measure::Matrix(vec![vec![1.0]]));
        m.insert("labels".into(), Measure::Labels(vec!["a".into()]));
        m.insert("f1".into(),     Measure::Scalar(0.25));
        m.insert("iteration".into(), Measure::Scalar(4.0));
        m.insert("train_loss".into(), Measure::Scalar(0.7));

        let folded: Vec<_> = foldable(&m).collect();
        assert_eq!(folded, vec![("acc", 0.5), ("f1", 0.25)]);
    }

    #[test]
    fn test_measure_serialises_untagged() {
        let json = serde_json::to_string(&Measure::Vector(vec![1.0, 2.0])).unwrap();
        assert_eq!(json, "[1.0,2.0]");
    }
}
