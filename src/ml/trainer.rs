// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Iteration-based training with gradient accumulation.
//
// One optimizer step ("iteration") consumes iter_size batches:
//
//   for each batch:
//       inputs, y  ← corrupt(batch)             masked-LM
//                  ← (batch.data, one_hot(t))   classification
//       loss       ← CE(logits[b*s, v], y[b*s]) masked-LM
//                  ← MSE(scores, one_hot)       classification
//       loss      /= iter_size                  when iter_size > 1
//       grads     += ∂loss
//   every iter_size batches:
//       step, emit iteration / iter_time / remain_time / train_loss,
//       maybe evaluate, maybe log, maybe checkpoint
//
// The batch stream is re-opened whenever a pass runs dry, so
// the loop only stops once `iterations` steps are done, even in
// the middle of a pass.
//
// Key Burn 0.20 insight:
//   - Training runs on an AutodiffBackend (Autodiff<NdArray>)
//   - module.valid() gives the module on the inner backend,
//     which is what the evaluator runs on
//   - a frozen traced graph's parameters are marked no_grad, so
//     the optimizer only updates the head; masked-LM runs unfreeze
//     the graph since there is no head
//
// Errors raised while turning samples into batches propagate
// unchanged; a failed run leaves no cleanup behind.

use std::time::Instant;

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction},
    optim::{GradientsAccumulator, GradientsParams},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, SeedableRng};

use crate::application::config::SolverConfig;
use crate::data::batcher::TensorBatch;
use crate::data::stream::BatchStream;
use crate::domain::measure::{foldable, Measures};
use crate::infra::checkpoint::ModelRepository;
use crate::infra::metrics::MeasureLog;
use crate::ml::error::ModelError;
use crate::ml::evaluator::{EvalContext, Evaluator};
use crate::ml::masking::{lm_loss, MaskedBatchCorruptor};
use crate::ml::module::ComposedModule;
use crate::ml::solver::Solver;
use crate::ml::value::{host_ints, DynTensor, GraphValue};

/// What a finished training run leaves behind.
#[derive(Debug)]
pub struct TrainReport {
    /// Optimizer steps applied
    pub steps:       usize,
    /// Names passed to save_checkpoint, in order
    pub checkpoints: Vec<String>,
    /// Measures of the final pass over the test set
    pub measures:    Measures,
    pub log:         MeasureLog,
}

pub struct Trainer<'a, B: AutodiffBackend> {
    cfg:        &'a SolverConfig,
    repository: &'a ModelRepository,
    evaluator:  Evaluator<'a>,
    corruptor:  Option<MaskedBatchCorruptor>,
    nclasses:   usize,
    rng:        StdRng,
    log:        MeasureLog,
    device:     B::Device,
}

impl<'a, B: AutodiffBackend> Trainer<'a, B> {
    pub fn new(
        cfg:        &'a SolverConfig,
        repository: &'a ModelRepository,
        evaluator:  Evaluator<'a>,
        device:     B::Device,
    ) -> Self {
        Self {
            cfg,
            repository,
            evaluator,
            corruptor: None,
            nclasses:  0,
            rng:       StdRng::seed_from_u64(0),
            log:       MeasureLog::new(),
            device,
        }
    }

    /// Train the traced graph's language-model output on corrupted tokens.
    pub fn masked_lm(mut self, corruptor: MaskedBatchCorruptor, seed: u64) -> Self {
        self.corruptor = Some(corruptor);
        self.rng       = StdRng::seed_from_u64(seed);
        self
    }

    /// Width of the one-hot targets for classification.
    pub fn classes(mut self, nclasses: usize) -> Self {
        self.nclasses = nclasses;
        self
    }

    pub fn with_log(mut self, log: MeasureLog) -> Self {
        self.log = log;
        self
    }

    /// Run `cfg.iterations` optimizer steps, then evaluate on `test`.
    ///
    /// `test` yields batches on the inner backend, where the
    /// evaluator runs the `valid()` copy of the module.
    pub fn train(
        mut self,
        mut module: ComposedModule<B>,
        train:      &BatchStream<B>,
        test:       &BatchStream<B::InnerBackend>,
    ) -> Result<(ComposedModule<B>, TrainReport)> {
        if train.is_empty() {
            return Err(ModelError::EmptyTrainingSet.into());
        }
        if !module.has_trainable() {
            return Err(ModelError::Config("module has no trainable parameters".to_string()).into());
        }

        let iterations = self.cfg.iterations;
        let window     = self.cfg.window();
        let mut solver = Solver::<ComposedModule<B>, B>::new(self.cfg.solver_type, self.cfg.base_lr);
        let mut accum  = GradientsAccumulator::<ComposedModule<B>>::new();
        module.train();

        tracing::info!("Training for {} iterations", iterations);
        let mut it          = 0usize;
        let mut batch_id    = 0usize;
        let mut train_loss  = 0.0f64;
        let mut avg_it_time = 0.0f64;
        let mut checkpoints = Vec::new();

        'passes: while it < iterations {
            for batch in train.pass() {
                let tstart = Instant::now();
                let loss   = self.batch_loss(&module, batch?)?;
                let loss   = if window > 1 { loss / window as f64 } else { loss };

                let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
                train_loss += loss_val;
                let grads = GradientsParams::from_grads(loss.backward(), &module);
                accum.accumulate::<B>(&module, grads);
                avg_it_time += tstart.elapsed().as_secs_f64() * 1000.0;
                batch_id += 1;

                if batch_id % window != 0 {
                    continue;
                }

                // ── Optimizer step ────────────────────────────────────────────
                module = solver.step(module, accum.grads());
                avg_it_time /= window as f64;
                let elapsed = it + 1;

                self.log.add_meas("iteration", elapsed as f64);
                self.log.add_meas("iter_time", avg_it_time);
                self.log.add_meas(
                    "remain_time",
                    avg_it_time * window as f64 * (iterations - it) as f64 / 1000.0,
                );
                self.log.add_meas("train_loss", train_loss);
                self.log.add_meas_per_iter("train_loss", train_loss, elapsed)?;
                train_loss  = 0.0;
                avg_it_time = 0.0;

                if self.cfg.test_interval != 0 && elapsed % self.cfg.test_interval == 0 && !test.is_empty() {
                    let measures = self.test(&module, test)?;
                    for (name, value) in foldable(&measures) {
                        tracing::info!("{}={}", name, value);
                        self.log.add_meas(name, value);
                        self.log.add_meas_per_iter(name, value, elapsed)?;
                    }
                }

                if self.cfg.log_batch_period != 0 && elapsed % self.cfg.log_batch_period == 0 {
                    tracing::info!("Iteration {}/{}: loss is {}", elapsed, iterations, loss_val);
                }

                if (self.cfg.save_period != 0 && elapsed % self.cfg.save_period == 0) || elapsed == iterations {
                    tracing::info!("Saving checkpoint after {} iterations", elapsed);
                    let name = elapsed.to_string();
                    module.save_checkpoint(self.repository, &name)?;
                    checkpoints.push(name);
                }

                it += 1;
                if it >= iterations {
                    break 'passes;
                }
            }
        }

        let measures = if test.is_empty() {
            tracing::warn!("No test set, skipping final evaluation");
            Measures::new()
        } else {
            self.test(&module, test)?
        };
        tracing::info!("Training complete after {} iterations ({} batches)", solver.steps(), batch_id);

        let report = TrainReport {
            steps: solver.steps(),
            checkpoints,
            measures,
            log: self.log,
        };
        Ok((module, report))
    }

    // ─── Per-batch loss ───────────────────────────────────────────────────────
    fn batch_loss(&mut self, module: &ComposedModule<B>, batch: TensorBatch<B>) -> Result<Tensor<B, 1>, ModelError> {
        match &self.corruptor {
            Some(corruptor) => {
                let (target, inputs) = corruptor.corrupt(batch, &mut self.rng, &self.device)?;
                let logits = module.forward(inputs)?.into_tensor()?.into_float3()?;
                lm_loss(logits, target, &self.device)
            }
            None => {
                let target = batch.target.into_iter().next().ok_or(ModelError::MissingLabel)?;
                let y      = self.one_hot(target)?;
                let inputs = batch
                    .data
                    .into_iter()
                    .map(|t| GraphValue::Tensor(t.to_device(&self.device)))
                    .collect();
                let scores = module.forward(inputs)?.into_tensor()?.into_float2()?;
                Ok(MseLoss::new().forward(scores, y, Reduction::Mean))
            }
        }
    }

    fn one_hot(&self, target: DynTensor<B>) -> Result<Tensor<B, 2>, ModelError> {
        let labels = host_ints(target.into_int1()?)?;
        let width  = self.nclasses;
        let mut y  = vec![0.0f32; labels.len() * width];
        for (row, &label) in labels.iter().enumerate() {
            let class = usize::try_from(label)
                .ok()
                .filter(|&c| c < width)
                .ok_or_else(|| ModelError::Data(format!("label {label} outside 0..{width}")))?;
            y[row * width + class] = 1.0;
        }
        DynTensor::features(y, labels.len(), width, &self.device).into_float2()
    }

    // ─── Evaluation hook ──────────────────────────────────────────────────────
    fn test(
        &mut self,
        module: &ComposedModule<B>,
        stream: &BatchStream<B::InnerBackend>,
    ) -> Result<Measures, ModelError> {
        let ctx = EvalContext {
            iteration:  self.log.get_meas("iteration").unwrap_or(0.0) as usize,
            train_loss: self.log.get_meas("train_loss").unwrap_or(0.0),
        };
        self.evaluator.evaluate(module.valid(), stream, ctx, &mut self.rng, &self.device)
    }
}
