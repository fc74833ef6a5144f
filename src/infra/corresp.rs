// ============================================================
// Layer 6 — Class Label Table
// ============================================================
// Reads <repository>/corresp.txt, one "<index> <label>" pair
// per line. Labels may contain spaces. Classes missing from the
// table are named by their index.

use anyhow::{Context, Result};
use std::{collections::HashMap, fs, path::Path};

use crate::domain::traits::LabelLookup;

pub const CORRESP_FILE: &str = "corresp.txt";

#[derive(Debug, Clone, Default)]
pub struct CorrespTable {
    labels: HashMap<usize, String>,
}

impl CorrespTable {
    /// Table from `<dir>/corresp.txt`, empty when the file is absent.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(CORRESP_FILE);
        if !path.exists() {
            tracing::debug!("No '{}', class labels fall back to indices", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        let table = Self::parse(&text).with_context(|| format!("Malformed '{}'", path.display()))?;
        tracing::debug!("Loaded {} class labels from '{}'", table.len(), path.display());
        Ok(table)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut labels = HashMap::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (index, label) = line
                .split_once(char::is_whitespace)
                .with_context(|| format!("line {}: expected '<index> <label>'", n + 1))?;
            let index: usize = index
                .parse()
                .with_context(|| format!("line {}: bad class index '{}'", n + 1, index))?;
            labels.insert(index, label.trim().to_string());
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

impl LabelLookup for CorrespTable {
    fn label(&self, index: usize) -> String {
        self.labels.get(&index).cloned().unwrap_or_else(|| index.to_string())
    }
}
