// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates one training run in order:
//
//   Step 1: Open the model repository      (Layer 6 - infra)
//   Step 2: Save the effective config      (Layer 6 - infra)
//   Step 3: Load samples                   (Layer 4 - data)
//   Step 4: Build + load the module        (Layer 5 - ml)
//   Step 5: Wire evaluator and corruptor   (Layer 5 - ml)
//   Step 6: Run the training loop          (Layer 5 - ml)
//   Step 7: Refresh the model descriptor   (Layer 6 - infra)
//   Step 8: Emit the final measures        (Layer 6 - infra)
//
// Errors from the input connector are passed up untouched. A
// masked-LM run whose vocabulary or mask id does not fit the
// graph's embedding table is rejected before the first step.
//
// Reference: Burn Book §5 (Training)

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use serde_json::Value;

use crate::application::config::{ModelConfig, RunConfig, SolverConfig};
use crate::data::{dataset::SampleDataset, stream::BatchStream};
use crate::domain::measure::{Measure, RUN_MEASURES};
use crate::domain::traits::{InputConnector, LabelLookup};
use crate::infra::{
    checkpoint::ModelRepository,
    corresp::CorrespTable,
    measures::SupervisedMeasurer,
    metrics::MeasureLog,
    output::JsonOutput,
};
use crate::ml::{
    evaluator::Evaluator,
    masking::MaskedBatchCorruptor,
    module::ComposedModule,
    trainer::Trainer,
};

pub struct TrainUseCase {
    model:  ModelConfig,
    solver: SolverConfig,
}

impl TrainUseCase {
    pub fn new(model: ModelConfig, solver: SolverConfig) -> Self {
        Self { model, solver }
    }

    /// Train on `B` and return the measure payload.
    pub fn execute<B: AutodiffBackend>(
        &self,
        input:  &dyn InputConnector,
        output: &JsonOutput,
        device: B::Device,
    ) -> Result<Value> {
        let cfg = &self.model;

        // ── Step 1-2: Repository + effective config ───────────────────────────
        let repo = ModelRepository::new(&cfg.repository)?;
        repo.save_config(&RunConfig { model: cfg.clone(), solver: self.solver.clone() })?;

        // ── Step 3: Samples ───────────────────────────────────────────────────
        let corpus = input.load()?;

        // ── Step 4: Module ────────────────────────────────────────────────────
        let descriptor = repo.descriptor(cfg.traced.as_deref(), cfg.weights.as_deref())?;
        let mut module = ComposedModule::<B>::new(cfg, &device)
            .context("Cannot build the composed module")?
            .load(&descriptor, &device)?;
        if cfg.trains_traced() {
            module = module.unfreeze_traced();
        }
        for p in module.parameters() {
            tracing::debug!("param {} {:?} trainable={}", p.name, p.shape, p.trainable);
        }

        // ── Step 5: Evaluator, corruptor ──────────────────────────────────────
        let labels   = CorrespTable::open(repo.dir())?;
        let nclasses = cfg.nclasses.unwrap_or(0);
        let measurer = SupervisedMeasurer;
        let mut evaluator = Evaluator::new(&measurer, self.solver.measures.clone(), labels.labels(nclasses));

        let corruptor = if cfg.masked_lm {
            let c = MaskedBatchCorruptor::new(&cfg.masking, corpus.mask_id, corpus.vocab_size)?;
            if let Some(rows) = module.embedding_rows() {
                c.check_table(rows)?;
            }
            evaluator = evaluator.with_corruptor(c.clone(), cfg.masking.eval_seed);
            Some(c)
        } else {
            None
        };

        // ── Step 6: Training loop ─────────────────────────────────────────────
        let train = BatchStream::<B>::new(SampleDataset::new(corpus.train), self.solver.batch_size, &device);
        let test  = BatchStream::<B::InnerBackend>::new(
            SampleDataset::new(corpus.test),
            self.solver.test_batch_size,
            &device,
        );
        let log   = MeasureLog::new().with_csv(repo.dir())?;

        let mut trainer = Trainer::<B>::new(&self.solver, &repo, evaluator, device)
            .classes(nclasses)
            .with_log(log);
        if let Some(c) = corruptor {
            trainer = trainer.masked_lm(c, cfg.masking.seed);
        }
        let (_module, report) = trainer.train(module, &train, &test)?;

        // ── Step 7: Refresh descriptor ────────────────────────────────────────
        let latest = repo.scan()?;
        tracing::info!(
            "Repository now serves trace={:?} weights={:?}",
            latest.traced, latest.weights
        );

        // ── Step 8: Measures ──────────────────────────────────────────────────
        // Without a test set the measurer never ran
        let losses       = report.log.history("train_loss");
        let mut measures = report.measures;
        for name in RUN_MEASURES {
            if let Some(v) = report.log.get_meas(name) {
                measures.entry(name.to_string()).or_insert(Measure::Scalar(v));
            }
        }
        tracing::info!("Training done: {} steps, {} checkpoints", report.steps, report.checkpoints.len());
        if let (Some(first), Some(last)) = (losses.first(), losses.last()) {
            tracing::info!("train_loss went from {:.6} to {:.6}", first, last);
        }
        output.measure(&measures)
    }
}
