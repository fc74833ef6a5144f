// ============================================================
// Layer 5 — Evaluator
// ============================================================
// Runs a module in eval mode over a batch stream and hands the
// results to a Measurer.
//
// Classification: every batch must carry a class-id target.
// Scores are softmax-normalised per row and recorded as one
// (target, probs) entry per example.
//
// Masked-LM: targets and inputs are derived with the same
// corruption routine as training, and the mean cross-entropy
// over batches is reported as eval_loss. With eval_seed set the
// corruption stream is reseeded on every call, so two
// evaluations of the same module give the same loss; without it
// the caller's stream is consumed.
//
// The evaluator is generic over any Backend: training hands it
// `module.valid()` so no autodiff graph is recorded.

use burn::prelude::*;
use rand::{rngs::StdRng, SeedableRng};

use crate::data::stream::BatchStream;
use crate::domain::measure::{EvalEntry, EvalRecords, Measures};
use crate::domain::traits::Measurer;
use crate::ml::error::ModelError;
use crate::ml::masking::{lm_loss, MaskedBatchCorruptor};
use crate::ml::module::ComposedModule;
use crate::ml::value::{host_ints, softmax_rows, GraphValue};

/// Run-level metadata attached to every evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext {
    pub iteration:  usize,
    pub train_loss: f64,
}

pub struct Evaluator<'a> {
    measurer:  &'a dyn Measurer,
    requested: Vec<String>,
    clnames:   Vec<String>,
    nclasses:  usize,
    corruptor: Option<MaskedBatchCorruptor>,
    eval_seed: Option<u64>,
}

impl<'a> Evaluator<'a> {
    pub fn new(measurer: &'a dyn Measurer, requested: Vec<String>, clnames: Vec<String>) -> Self {
        Self {
            measurer,
            requested,
            nclasses: clnames.len(),
            clnames,
            corruptor: None,
            eval_seed: None,
        }
    }

    /// Switch to masked-LM evaluation.
    pub fn with_corruptor(mut self, corruptor: MaskedBatchCorruptor, eval_seed: Option<u64>) -> Self {
        self.corruptor = Some(corruptor);
        self.eval_seed = eval_seed;
        self
    }

    pub fn evaluate<B: Backend>(
        &self,
        mut module: ComposedModule<B>,
        stream:     &BatchStream<B>,
        ctx:        EvalContext,
        shared_rng: &mut StdRng,
        device:     &B::Device,
    ) -> Result<Measures, ModelError> {
        module.eval();
        let mut seeded = self.eval_seed.map(StdRng::seed_from_u64);
        let rng        = seeded.as_mut().unwrap_or(shared_rng);

        let total = stream.len();
        let mut records = EvalRecords {
            iteration:  ctx.iteration,
            train_loss: ctx.train_loss,
            clnames:    self.clnames.clone(),
            nclasses:   self.nclasses,
            ..EvalRecords::default()
        };
        let mut loss_sum = 0.0f64;
        let mut batches  = 0usize;

        for batch in stream.pass() {
            let batch = batch?;
            let rows  = batch.len();

            match &self.corruptor {
                Some(corruptor) => {
                    let (target, inputs) = corruptor.corrupt(batch, rng, device)?;
                    let logits = module.forward(inputs)?.into_tensor()?.into_float3()?;
                    let loss   = lm_loss(logits, target, device)?;
                    loss_sum += loss.into_scalar().elem::<f64>();
                    batches  += 1;
                }
                None => {
                    let target = batch.target.into_iter().next().ok_or(ModelError::MissingLabel)?;
                    let labels = host_ints(target.into_int1()?)?;
                    let inputs = batch.data.into_iter().map(GraphValue::Tensor).collect();
                    let scores = module.forward(inputs)?.into_tensor()?.into_float2()?;

                    for (label, probs) in labels.into_iter().zip(softmax_rows(scores)?) {
                        let target = usize::try_from(label)
                            .map_err(|_| ModelError::Data(format!("negative label {label}")))?;
                        records.entries.push(EvalEntry { target, probs });
                    }
                }
            }

            records.tested += rows;
            tracing::debug!("Testing: {}/{} entries processed", records.tested, total);
        }

        if batches > 0 {
            records.eval_loss = Some(loss_sum / batches as f64);
        }
        if let Some(width) = records.entries.first().map(|e| e.probs.len()) {
            records.nclasses = records.nclasses.max(width);
        }

        let measures = self.measurer.measure(&records, &self.requested);
        tracing::info!("Tested {} entries at iteration {}", records.tested, ctx.iteration);
        Ok(measures)
    }
}
