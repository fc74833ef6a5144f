// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Four subcommands:
//
//   train    — train a head (or the traced graph) on JSONL samples
//   predict  — rank classes, or measure, with the latest checkpoint
//   clear    — remove .json side files from a model repository
//   trace    — write a toy traced graph for smoke runs
//
// Flags are grouped into reusable `Args` blocks and converted
// into application configs with `From`, so Layer 2 never sees
// clap types.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::application::config::{ModelConfig, SolverConfig, BERT_HIDDEN};
use crate::application::trace_use_case::{TraceKind, TraceRequest};
use crate::data::loader::JsonlConnector;
use crate::ml::masking::MaskingConfig;
use crate::ml::solver::SolverKind;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train on JSONL samples and checkpoint into the repository
    Train(TrainArgs),

    /// Predict classes with the latest checkpoint
    Predict(PredictArgs),

    /// Remove .json side files from a model repository
    Clear(ClearArgs),

    /// Write a randomly initialised traced graph
    Trace(TraceArgs),
}

// ─── Shared groups ───────────────────────────────────────────────────────────
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Model repository directory
    #[arg(long, default_value = "model")]
    pub repository: String,

    /// Run on the accelerator (needs the `wgpu` build feature)
    #[arg(long)]
    pub gpu: bool,

    /// Number of classes of the head
    #[arg(long)]
    pub nclasses: Option<usize>,

    /// Head template: "bert-classification" or "linear"
    #[arg(long)]
    pub template: Option<String>,

    /// Input width of the head
    #[arg(long)]
    pub head_in: Option<usize>,

    /// Train the traced graph's parameters along with the head
    #[arg(long)]
    pub finetuning: bool,

    /// Masked language-model training on the traced graph output
    #[arg(long)]
    pub masked_lm: bool,

    /// Explicit traced graph file
    #[arg(long)]
    pub traced: Option<String>,

    /// Explicit head weights file
    #[arg(long)]
    pub weights: Option<String>,

    /// Probability that an eligible token is changed
    #[arg(long, default_value_t = 0.15)]
    pub change_prob: f64,

    /// Given a change, probability of the mask token
    #[arg(long, default_value_t = 0.8)]
    pub mask_prob: f64,

    /// Given a change, probability of a random token
    #[arg(long, default_value_t = 0.1)]
    pub rand_prob: f64,

    /// Seed of the training corruption stream
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Seed re-applied at every evaluation
    #[arg(long, default_value_t = 0)]
    pub eval_seed: u64,

    /// Let evaluation consume the training corruption stream
    #[arg(long)]
    pub shared_eval_rng: bool,
}

impl From<ModelArgs> for ModelConfig {
    fn from(a: ModelArgs) -> Self {
        ModelConfig {
            repository: a.repository,
            gpu:        a.gpu,
            nclasses:   a.nclasses,
            head_in:    a.head_in.unwrap_or(BERT_HIDDEN),
            template:   a.template,
            finetuning: a.finetuning,
            masked_lm:  a.masked_lm,
            traced:     a.traced,
            weights:    a.weights,
            masking: MaskingConfig {
                change_prob: a.change_prob,
                mask_prob:   a.mask_prob,
                rand_prob:   a.rand_prob,
                seed:        a.seed,
                eval_seed:   (!a.shared_eval_rng).then_some(a.eval_seed),
            },
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// JSONL file of samples
    #[arg(long)]
    pub data: PathBuf,

    /// Separate JSONL test file
    #[arg(long)]
    pub test_data: Option<PathBuf>,

    /// Share of the data held out for testing when no test file is given
    #[arg(long, default_value_t = 0.0)]
    pub test_split: f64,

    /// Seed of the train/test shuffle
    #[arg(long, default_value_t = 42)]
    pub split_seed: u64,

    /// Vocabulary size; derived from the data when unset
    #[arg(long)]
    pub vocab_size: Option<i64>,

    /// Mask token id; defaults to the vocabulary size
    #[arg(long)]
    pub mask_id: Option<i64>,
}

impl From<&DataArgs> for JsonlConnector {
    fn from(a: &DataArgs) -> Self {
        JsonlConnector::new(a.data.clone())
            .with_test(a.test_data.clone())
            .with_split(a.test_split, a.split_seed)
            .with_vocab(a.vocab_size, a.mask_id)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SolverArgs {
    /// Number of optimizer steps
    #[arg(long, default_value_t = 100)]
    pub iterations: usize,

    /// SGD, ADAM, RMSPROP or ADAGRAD
    #[arg(long, default_value = "SGD")]
    pub solver_type: String,

    #[arg(long, default_value_t = 1e-4)]
    pub base_lr: f64,

    #[arg(long, default_value_t = 5)]
    pub batch_size: usize,

    /// Batches accumulated per optimizer step
    #[arg(long, default_value_t = 1)]
    pub iter_size: usize,

    #[arg(long, default_value_t = 1)]
    pub test_batch_size: usize,

    /// Evaluate every N steps (0 disables)
    #[arg(long, default_value_t = 1)]
    pub test_interval: usize,

    /// Checkpoint every N steps (0 = final step only)
    #[arg(long, default_value_t = 0)]
    pub save_period: usize,

    /// Log every N steps
    #[arg(long, default_value_t = 20)]
    pub log_batch_period: usize,

    /// Measures to compute, e.g. --measures acc,f1,cmdiag
    #[arg(long, value_delimiter = ',', default_value = "acc")]
    pub measures: Vec<String>,
}

impl From<SolverArgs> for SolverConfig {
    fn from(a: SolverArgs) -> Self {
        SolverConfig {
            iterations:       a.iterations,
            solver_type:      SolverKind::parse(&a.solver_type),
            base_lr:          a.base_lr,
            batch_size:       a.batch_size,
            iter_size:        a.iter_size,
            test_batch_size:  a.test_batch_size,
            test_interval:    a.test_interval,
            save_period:      a.save_period,
            log_batch_period: a.log_batch_period,
            measures:         a.measures,
        }
    }
}

// ─── Subcommands ─────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub solver: SolverArgs,

    /// Also write the JSON payload to this file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub data: DataArgs,

    /// Measures used with --measure
    #[arg(long, value_delimiter = ',', default_value = "acc")]
    pub measures: Vec<String>,

    #[arg(long, default_value_t = 1)]
    pub test_batch_size: usize,

    /// Keep the k most probable classes; without it no class is listed
    #[arg(long)]
    pub best: Option<usize>,

    /// Return measures over the samples instead of predictions
    #[arg(long)]
    pub measure: bool,

    /// Also write the JSON payload to this file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl PredictArgs {
    pub fn solver(&self) -> SolverConfig {
        SolverConfig {
            measures:        self.measures.clone(),
            test_batch_size: self.test_batch_size,
            ..SolverConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    #[arg(long, default_value = "model")]
    pub repository: String,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum TraceShape {
    /// Token ids to (lm_logits, pooled)
    Bag,
    /// Feature vector to a ReLU hidden layer
    Mlp,
}

#[derive(Args, Debug)]
pub struct TraceArgs {
    #[arg(long, value_enum, default_value_t = TraceShape::Bag)]
    pub shape: TraceShape,

    /// Vocabulary size (bag) or feature width (mlp)
    #[arg(long, default_value_t = 100)]
    pub input: usize,

    /// Embedding width (bag) or hidden width (mlp)
    #[arg(long, default_value_t = 16)]
    pub width: usize,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Repository receiving checkpoint-0-trace.bin
    #[arg(long, default_value = "model")]
    pub repository: String,

    /// Write to this file instead of the repository
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl From<&TraceArgs> for TraceRequest {
    fn from(a: &TraceArgs) -> Self {
        TraceRequest {
            kind: match a.shape {
                TraceShape::Bag => TraceKind::Bag,
                TraceShape::Mlp => TraceKind::Mlp,
            },
            input:  a.input,
            width:  a.width,
            seed:   a.seed,
            output: a.output.clone(),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn test_train_flags_map_to_configs() {
        let cmd = parse(&[
            "traced-classifier", "train", "--data", "d.jsonl", "--nclasses", "3",
            "--template", "linear", "--head-in", "8", "--solver-type", "adam",
            "--iter-size", "4", "--measures", "acc,f1", "--shared-eval-rng",
        ]);
        let Commands::Train(args) = cmd else { panic!("expected train") };

        let model: ModelConfig = args.model.into();
        assert_eq!(model.nclasses, Some(3));
        assert_eq!(model.head_in, 8);
        assert_eq!(model.masking.eval_seed, None);

        let solver: SolverConfig = args.solver.into();
        assert_eq!(solver.solver_type, SolverKind::Adam);
        assert_eq!(solver.iter_size, 4);
        assert_eq!(solver.measures, vec!["acc", "f1"]);
    }

    #[test]
    fn test_unknown_solver_falls_back() {
        let Commands::Train(args) = parse(&["x", "train", "--data", "d", "--solver-type", "LBFGS"])
        else { panic!("expected train") };
        assert_eq!(SolverConfig::from(args.solver).solver_type, SolverKind::Sgd);
    }

    #[test]
    fn test_predict_defaults() {
        let Commands::Predict(args) = parse(&["x", "predict", "--data", "d", "--best", "2"])
        else { panic!("expected predict") };
        assert_eq!(args.best, Some(2));
        assert!(!args.measure);
        assert_eq!(ModelConfig::from(args.model.clone()).masking.eval_seed, Some(0));
        assert_eq!(args.solver().measures, vec!["acc"]);
    }

    #[test]
    fn test_trace_request() {
        let Commands::Trace(args) = parse(&["x", "trace", "--shape", "mlp", "--input", "3"])
        else { panic!("expected trace") };
        let request = TraceRequest::from(&args);
        assert_eq!(request.kind, TraceKind::Mlp);
        assert_eq!(request.input, 3);
        assert_eq!(request.width, 16);
    }
}
