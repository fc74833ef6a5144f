// ============================================================
// Layer 5 — Predictor
// ============================================================
// Runs the composed module once, in eval mode, over a single
// precomputed batch and ranks the classes of every example:
//
//   scores ──► softmax(dim 1) ──► sort descending ──► top-k
//                                                      │
//                              (label, probability) ◄──┘
//
// k is clamped to the class count. Without k no class is kept:
// each record then only reports uri, loss and nclasses.
// A "measure" request skips ranking and runs the evaluator over
// the already-prepared dataset instead.

use burn::prelude::*;
use rand::{rngs::StdRng, SeedableRng};

use crate::data::batcher::TensorBatch;
use crate::data::stream::BatchStream;
use crate::domain::measure::Measures;
use crate::domain::prediction::PredictionRecord;
use crate::domain::traits::LabelLookup;
use crate::ml::error::ModelError;
use crate::ml::evaluator::{EvalContext, Evaluator};
use crate::ml::module::ComposedModule;
use crate::ml::value::{softmax_rows, GraphValue};

pub struct Predictor<'a, B: Backend> {
    module: ComposedModule<B>,
    labels: &'a dyn LabelLookup,
    device: B::Device,
}

impl<'a, B: Backend> Predictor<'a, B> {
    pub fn new(mut module: ComposedModule<B>, labels: &'a dyn LabelLookup, device: B::Device) -> Self {
        module.eval();
        Self { module, labels, device }
    }

    /// Rank classes for every row of `batch`. `uris[i]` names row i.
    pub fn predict(
        &self,
        batch: TensorBatch<B>,
        uris:  &[String],
        best:  Option<usize>,
    ) -> Result<Vec<PredictionRecord>, ModelError> {
        let inputs = batch
            .data
            .into_iter()
            .map(|t| GraphValue::Tensor(t.to_device(&self.device)))
            .collect();
        let scores = self.module.forward(inputs)?.into_tensor()?.into_float2()?;
        let rows   = softmax_rows(scores)?;

        let records: Vec<PredictionRecord> = rows
            .into_iter()
            .enumerate()
            .map(|(i, probs)| {
                let nclasses = probs.len();
                let k        = best.unwrap_or(0).min(nclasses);

                let mut ranked: Vec<(usize, f64)> = probs.into_iter().enumerate().collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                ranked.truncate(k);

                PredictionRecord {
                    uri:   uris.get(i).cloned().unwrap_or_else(|| i.to_string()),
                    loss:  0.0,
                    cats:  ranked.iter().map(|&(c, _)| self.labels.label(c)).collect(),
                    probs: ranked.iter().map(|&(_, p)| p).collect(),
                    nclasses,
                }
            })
            .collect();

        tracing::info!("Predicted {} examples", records.len());
        Ok(records)
    }

    /// Measures over `stream` instead of per-example rankings.
    pub fn measure(
        &self,
        evaluator: &Evaluator<'_>,
        stream:    &BatchStream<B>,
        seed:      u64,
    ) -> Result<Measures, ModelError> {
        let mut rng = StdRng::seed_from_u64(seed);
        evaluator.evaluate(self.module.clone(), stream, EvalContext::default(), &mut rng, &self.device)
    }
}
