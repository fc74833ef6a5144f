// ============================================================
// Layer 6 — JSON Output Connector
// ============================================================
// Prediction payload:
//
//   { "status": 0,
//     "body": { "predictions": [
//         { "uri": "...", "loss": 0.0, "cats": ["pos", "neg"],
//           "probs": [0.91, 0.09], "nclasses": 2 } ] } }
//
// Measure payload:
//
//   { "measure": { "acc": 0.75, "iteration": 100, ... } }
//
// When a path is set the payload is also written there.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::{fs, path::PathBuf};

use crate::domain::measure::Measures;
use crate::domain::prediction::PredictionRecord;
use crate::domain::traits::OutputConnector;

#[derive(Debug, Clone, Default)]
pub struct JsonOutput {
    path: Option<PathBuf>,
}

impl JsonOutput {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn measure(&self, measures: &Measures) -> Result<Value> {
        self.emit(json!({ "measure": measures }))
    }

    fn emit(&self, payload: Value) -> Result<Value> {
        if let Some(path) = &self.path {
            fs::write(path, serde_json::to_string_pretty(&payload)?)
                .with_context(|| format!("Cannot write output to '{}'", path.display()))?;
            tracing::info!("Wrote output to '{}'", path.display());
        }
        Ok(payload)
    }
}

impl OutputConnector for JsonOutput {
    fn finalize(&self, predictions: &[PredictionRecord]) -> Result<Value> {
        self.emit(json!({
            "status": 0,
            "body":   { "predictions": predictions },
        }))
    }
}
