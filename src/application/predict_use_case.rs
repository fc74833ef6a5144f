// ============================================================
// Layer 2 — PredictUseCase
// ============================================================
// Loads the latest checkpoint from the repository and either
//
//   - ranks classes for every sample (prediction payload), or
//   - evaluates the samples and returns only the measures
//     (measure payload, no iteration key).
//
// Options left unset (class count, template, masked-LM) are
// taken from the config.json saved by the training run. All
// samples the connector yields are predicted in one batch.

use anyhow::{Context, Result};
use burn::prelude::*;
use serde_json::Value;

use crate::application::config::{ModelConfig, RunConfig, SolverConfig};
use crate::data::{batcher::TensorBatcher, dataset::SampleDataset, stream::BatchStream};
use crate::domain::traits::{InputConnector, LabelLookup, OutputConnector};
use crate::infra::{
    checkpoint::ModelRepository, corresp::CorrespTable, measures::SupervisedMeasurer, output::JsonOutput,
};
use crate::ml::{
    evaluator::Evaluator, masking::MaskedBatchCorruptor, module::ComposedModule, predictor::Predictor,
};

/// What the caller wants back.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictRequest {
    /// Keep the k most probable classes; none when unset
    pub best:    Option<usize>,
    /// Return measures instead of predictions
    pub measure: bool,
}

pub struct PredictUseCase {
    model:  ModelConfig,
    solver: SolverConfig,
}

impl PredictUseCase {
    pub fn new(model: ModelConfig, solver: SolverConfig) -> Self {
        Self { model, solver }
    }

    pub fn execute<B: Backend>(
        &self,
        input:   &dyn InputConnector,
        output:  &JsonOutput,
        request: PredictRequest,
        device:  B::Device,
    ) -> Result<Value> {
        let repo = ModelRepository::new(&self.model.repository)?;
        let cfg  = match repo.load_config::<RunConfig>() {
            Ok(saved) => self.model.clone().fill_from(&saved.model),
            Err(e) => {
                tracing::debug!("No saved run config: {e:#}");
                self.model.clone()
            }
        };
        let cfg = &cfg;

        let descriptor = repo.descriptor(cfg.traced.as_deref(), cfg.weights.as_deref())?;
        let module = ComposedModule::<B>::new(cfg, &device)
            .context("Cannot build the composed module")?
            .load(&descriptor, &device)?;

        let corpus  = input.load()?;
        let samples: Vec<_> = corpus.train.into_iter().chain(corpus.test).collect();
        if samples.is_empty() {
            anyhow::bail!("No samples to predict");
        }

        let corruptor = if cfg.masked_lm {
            let c = MaskedBatchCorruptor::new(&cfg.masking, corpus.mask_id, corpus.vocab_size)?;
            if let Some(rows) = module.embedding_rows() {
                c.check_table(rows)?;
            }
            Some(c)
        } else {
            None
        };

        let labels    = CorrespTable::open(repo.dir())?;
        let predictor = Predictor::new(module, &labels, device.clone());

        if request.measure {
            let measurer = SupervisedMeasurer;
            let clnames  = labels.labels(cfg.nclasses.unwrap_or(0));
            let mut evaluator = Evaluator::new(&measurer, self.solver.measures.clone(), clnames);
            if let Some(c) = corruptor {
                evaluator = evaluator.with_corruptor(c, cfg.masking.eval_seed);
            }
            let stream = BatchStream::<B>::new(SampleDataset::new(samples), self.solver.test_batch_size, &device);
            let mut measures = predictor.measure(&evaluator, &stream, cfg.masking.seed)?;
            measures.remove("iteration");
            return output.measure(&measures);
        }

        let uris: Vec<String> = samples.iter().map(|s| s.uri.clone()).collect();
        let batch   = TensorBatcher.stack::<B>(&samples, &device)?;
        let records = predictor.predict(batch, &uris, request.best)?;
        output.finalize(&records)
    }
}
