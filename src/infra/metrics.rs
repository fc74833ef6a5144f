// ============================================================
// Layer 6 — Measurement Log
// ============================================================
// Keeps the measures emitted while training:
//
//   add_meas          — overwrite the current value of a measure
//   add_meas_per_iter — append to the measure's history and, when
//                       a CSV sink is attached, write one row
//   get_meas          — current value
//
// Output file: <repository>/metrics.csv
//
// Example CSV output:
//   iteration,name,value
//   1,train_loss,0.693147
//   1,iter_time,12.400000
//   2,train_loss,0.612250
//   ...
//
// The file is appended to across runs; the header is only
// written when the file is new.

use anyhow::Result;
use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

const CSV_FILE: &str = "metrics.csv";

#[derive(Debug, Default)]
pub struct MeasureLog {
    current: BTreeMap<String, f64>,
    history: BTreeMap<String, Vec<f64>>,
    csv:     Option<PathBuf>,
}

impl MeasureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `<dir>/metrics.csv`, creating it with a header if needed.
    pub fn with_csv(mut self, dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let csv_path = dir.join(CSV_FILE);
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "iteration,name,value")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }
        self.csv = Some(csv_path);
        Ok(self)
    }

    pub fn add_meas(&mut self, name: &str, value: f64) {
        self.current.insert(name.to_string(), value);
    }

    /// Record `value` for optimizer step `iteration` and make it current.
    pub fn add_meas_per_iter(&mut self, name: &str, value: f64, iteration: usize) -> Result<()> {
        self.history.entry(name.to_string()).or_default().push(value);
        self.add_meas(name, value);

        if let Some(path) = &self.csv {
            let mut f = OpenOptions::new().append(true).open(path)?;
            writeln!(f, "{},{},{:.6}", iteration, name, value)?;
        }
        Ok(())
    }

    pub fn get_meas(&self, name: &str) -> Option<f64> {
        self.current.get(name).copied()
    }

    pub fn history(&self, name: &str) -> &[f64] {
        self.history.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_and_history() {
        let mut log = MeasureLog::new();
        log.add_meas_per_iter("train_loss", 0.9, 1).unwrap();
        log.add_meas_per_iter("train_loss", 0.7, 2).unwrap();
        log.add_meas("iteration", 2.0);

        assert_eq!(log.get_meas("train_loss"), Some(0.7));
        assert_eq!(log.history("train_loss"), &[0.9, 0.7]);
        assert!(log.history("acc").is_empty());
        assert_eq!(log.get_meas("iteration"), Some(2.0));
    }

    #[test]
    fn test_csv_rows_appended() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = MeasureLog::new().with_csv(dir.path()).unwrap();
        log.add_meas_per_iter("acc", 0.5, 3).unwrap();

        let text = fs::read_to_string(dir.path().join(CSV_FILE)).unwrap();
        assert_eq!(text, "iteration,name,value\n3,acc,0.500000\n");
    }
}
