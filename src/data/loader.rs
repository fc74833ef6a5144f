// ============================================================
// Layer 4 — JSON Lines Input Connector
// ============================================================
// Reads samples, one JSON object per line:
//
//   {"uri": "doc-1", "inputs": [{"tokens": [101, 7, 102]},
//                               {"tokens": [0, 0, 0]},
//                               {"tokens": [1, 1, 1]}], "target": 1}
//
// Blank lines are skipped. A malformed line fails the whole load
// with the file name and line number attached.
//
// The held-out set comes from a dedicated test file when one is
// given, otherwise from a seeded split of the training file.
//
// For masked-LM the connector also reports the vocabulary bound
// used for random replacement ids and the mask token id. Unless
// set explicitly, vocab_size is one past the largest id found in
// input #0 and the mask id is vocab_size itself, an id no sample
// uses.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::data::splitter::split_train_test;
use crate::domain::sample::{Corpus, Field, Sample};
use crate::domain::traits::InputConnector;

#[derive(Debug, Clone)]
pub struct JsonlConnector {
    train:      PathBuf,
    test:       Option<PathBuf>,
    /// Share of the training file held out when no test file is given
    test_split: f64,
    seed:       u64,
    vocab_size: Option<i64>,
    mask_id:    Option<i64>,
}

impl JsonlConnector {
    pub fn new(train: impl Into<PathBuf>) -> Self {
        Self {
            train:      train.into(),
            test:       None,
            test_split: 0.0,
            seed:       0,
            vocab_size: None,
            mask_id:    None,
        }
    }

    pub fn with_test(mut self, test: Option<PathBuf>) -> Self {
        self.test = test;
        self
    }

    pub fn with_split(mut self, test_split: f64, seed: u64) -> Self {
        self.test_split = test_split;
        self.seed       = seed;
        self
    }

    pub fn with_vocab(mut self, vocab_size: Option<i64>, mask_id: Option<i64>) -> Self {
        self.vocab_size = vocab_size;
        self.mask_id    = mask_id;
        self
    }
}

impl InputConnector for JsonlConnector {
    fn load(&self) -> Result<Corpus> {
        let mut train = read_samples(&self.train)?;
        let test = match &self.test {
            Some(path) => read_samples(path)?,
            None if self.test_split > 0.0 => {
                let (kept, held_out) = split_train_test(train, 1.0 - self.test_split, self.seed);
                train = kept;
                held_out
            }
            None => Vec::new(),
        };

        let vocab_size = self
            .vocab_size
            .unwrap_or_else(|| max_token_id(train.iter().chain(&test)).map_or(0, |m| m + 1));
        let mask_id = self.mask_id.unwrap_or(vocab_size);

        tracing::info!(
            "Corpus ready: {} training / {} test samples, vocab_size={}, mask_id={}",
            train.len(), test.len(), vocab_size, mask_id
        );
        Ok(Corpus { train, test, vocab_size, mask_id })
    }
}

/// Parse every non-blank line of `path` as a Sample.
pub fn read_samples(path: &Path) -> Result<Vec<Sample>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read samples from '{}'", path.display()))?;

    let mut samples = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let sample: Sample = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: malformed sample", path.display(), n + 1))?;
        samples.push(sample);
    }

    tracing::info!("Loaded {} samples from '{}'", samples.len(), path.display());
    Ok(samples)
}

fn max_token_id<'a>(samples: impl Iterator<Item = &'a Sample>) -> Option<i64> {
    samples
        .filter_map(|s| match s.inputs.first() {
            Some(Field::Tokens(ids)) => ids.iter().copied().max(),
            _ => None,
        })
        .max()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    const A: &str = r#"{"uri":"a","inputs":[{"tokens":[1,5,2]}],"target":0}"#;
    const B: &str = r#"{"uri":"b","inputs":[{"tokens":[1,9,2]}],"target":1}"#;

    #[test]
    fn test_reads_train_and_test_files() {
        let dir   = tempfile::tempdir().unwrap();
        let train = write(dir.path(), "train.jsonl", &[A, "", B]);
        let test  = write(dir.path(), "test.jsonl",  &[A]);

        let corpus = JsonlConnector::new(train).with_test(Some(test)).load().unwrap();
        assert_eq!(corpus.train.len(), 2);
        assert_eq!(corpus.test.len(),  1);
        assert_eq!(corpus.vocab_size, 10);
        assert_eq!(corpus.mask_id,    10);
    }

    #[test]
    fn test_split_when_no_test_file() {
        let dir   = tempfile::tempdir().unwrap();
        let lines = vec![A; 10];
        let train = write(dir.path(), "train.jsonl", &lines);

        let corpus = JsonlConnector::new(train).with_split(0.2, 7).load().unwrap();
        assert_eq!(corpus.train.len(), 8);
        assert_eq!(corpus.test.len(),  2);
    }

    #[test]
    fn test_explicit_vocab_wins() {
        let dir   = tempfile::tempdir().unwrap();
        let train = write(dir.path(), "train.jsonl", &[A]);
        let corpus = JsonlConnector::new(train).with_vocab(Some(30), Some(3)).load().unwrap();
        assert_eq!((corpus.vocab_size, corpus.mask_id), (30, 3));
    }

    #[test]
    fn test_malformed_line_names_location() {
        let dir   = tempfile::tempdir().unwrap();
        let train = write(dir.path(), "train.jsonl", &[A, "{not json"]);
        let err   = JsonlConnector::new(train).load().unwrap_err();
        assert!(format!("{err:#}").contains("train.jsonl:2"));
    }
}
