// ============================================================
// Layer 3 — Prediction Record
// ============================================================
use serde::{Deserialize, Serialize};

/// Top classes of one example, most probable first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub uri:      String,
    pub loss:     f64,
    pub cats:     Vec<String>,
    pub probs:    Vec<f64>,
    pub nclasses: usize,
}
