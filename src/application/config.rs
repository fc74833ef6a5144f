// ============================================================
// Layer 2 — Configuration
// ============================================================
// Two serialisable option groups:
//
//   ModelConfig  — how the composed module is built and where
//                  its files live (read at init time)
//   SolverConfig — training-loop tuning (read per train call)
//
// Both are filled from CLI flags and the effective values are
// written to <repository>/config.json at the start of training.

use serde::{Deserialize, Serialize};

use crate::ml::masking::MaskingConfig;
use crate::ml::solver::SolverKind;

/// Head output width hard-wired into the BERT classification template
pub const BERT_HIDDEN: usize = 768;

// ─── ModelConfig ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Directory holding checkpoints, config.json, corresp.txt, metrics.csv
    pub repository: String,
    /// Use the accelerator when the binary was built with one
    pub gpu:        bool,
    /// Output width of the classification head
    pub nclasses:   Option<usize>,
    /// Head architecture, e.g. "bert-classification" or "linear"
    pub template:   Option<String>,
    /// Reserved: expose the traced graph's parameters to the optimizer
    pub finetuning: bool,
    /// Train the traced graph's language-model output instead of a head
    pub masked_lm:  bool,
    /// Input width of the head
    pub head_in:    usize,
    /// Explicit traced graph file; otherwise the repository is scanned
    pub traced:     Option<String>,
    /// Explicit head weights file; otherwise the repository is scanned
    pub weights:    Option<String>,
    pub masking:    MaskingConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            repository: "model".to_string(),
            gpu:        false,
            nclasses:   None,
            template:   None,
            finetuning: false,
            masked_lm:  false,
            head_in:    BERT_HIDDEN,
            traced:     None,
            weights:    None,
            masking:    MaskingConfig::default(),
        }
    }
}

impl ModelConfig {
    /// Fill options left unset on the command line from a saved run.
    /// An inherited template brings its head width along.
    pub fn fill_from(mut self, saved: &ModelConfig) -> Self {
        if self.template.is_none() {
            self.head_in = saved.head_in;
        }
        self.nclasses   = self.nclasses.or(saved.nclasses);
        self.template   = self.template.or_else(|| saved.template.clone());
        self.masked_lm |= saved.masked_lm;
        self.finetuning |= saved.finetuning;
        self
    }

    /// Whether training updates the traced graph's own parameters.
    pub fn trains_traced(&self) -> bool {
        self.masked_lm || self.finetuning
    }
}

// ─── SolverConfig ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Number of optimizer steps to run
    pub iterations:       usize,
    pub solver_type:      SolverKind,
    pub base_lr:          f64,
    pub batch_size:       usize,
    /// Batches accumulated per optimizer step
    pub iter_size:        usize,
    pub test_batch_size:  usize,
    /// Evaluate every N optimizer steps (0 disables)
    pub test_interval:    usize,
    /// Checkpoint every N optimizer steps (0 = final step only)
    pub save_period:      usize,
    /// Log progress every N optimizer steps (0 disables)
    pub log_batch_period: usize,
    /// Measures requested from the measurer, e.g. ["acc", "f1", "cmdiag"]
    pub measures:         Vec<String>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations:       100,
            solver_type:      SolverKind::Sgd,
            base_lr:          0.0001,
            batch_size:       5,
            iter_size:        1,
            test_batch_size:  1,
            test_interval:    1,
            save_period:      0,
            log_batch_period: 20,
            measures:         vec!["acc".to_string()],
        }
    }
}

impl SolverConfig {
    /// Accumulation window, never below one batch
    pub fn window(&self) -> usize {
        self.iter_size.max(1)
    }
}

// ─── RunConfig ───────────────────────────────────────────────────────────────
/// Everything written to `<repository>/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub model:  ModelConfig,
    pub solver: SolverConfig,
}
