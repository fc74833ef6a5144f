// ============================================================
// Layer 5 — Masked Batch Corruptor
// ============================================================
// Builds masked-language-model training pairs from a batch
// whose inputs are (token_ids, token_types, attention_mask, ...).
//
// For every row, starting at position 1 (position 0 holds the
// leading [CLS] control token) and stopping at the first
// position whose attention mask is 0:
//
//   p ~ U(0,1)
//   p >= change_prob          → keep token
//   otherwise q ~ U(0,1)
//     q <  mask_prob              → mask_token
//     q <  mask_prob + rand_prob  → uniform id in [0, vocab_size]
//     else                        → keep token
//
// The inner draw is one categorical over {mask, random, keep},
// so mask_prob + rand_prob must not exceed 1.
//
// The RNG is passed in by the caller: training and evaluation
// each own their stream.

use burn::{nn::loss::CrossEntropyLossConfig, prelude::*};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::batcher::TensorBatch;
use crate::ml::error::ModelError;
use crate::ml::value::{check_ids, host_ints, DynTensor, GraphValue};

/// Position 0 holds the leading control token
const FIRST_ELIGIBLE: usize = 1;
/// Batch input holding the attention mask
const MASK_INPUT: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskingConfig {
    /// Probability that an eligible token is changed at all
    pub change_prob: f64,
    /// Given a change, probability of the mask token
    pub mask_prob:   f64,
    /// Given a change, probability of a random token
    pub rand_prob:   f64,
    /// Seed of the training corruption stream
    pub seed:        u64,
    /// Seed re-applied at every evaluation; None shares the training stream
    pub eval_seed:   Option<u64>,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            change_prob: 0.15,
            mask_prob:   0.8,
            rand_prob:   0.1,
            seed:        0,
            eval_seed:   Some(0),
        }
    }
}

/// Per-call tally of what happened to eligible tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorruptionStats {
    pub eligible:   usize,
    pub masked:     usize,
    pub randomized: usize,
    pub kept:       usize,
}

#[derive(Debug, Clone)]
pub struct MaskedBatchCorruptor {
    change_prob: f64,
    mask_prob:   f64,
    rand_prob:   f64,
    mask_token:  i64,
    vocab_size:  i64,
}

impl MaskedBatchCorruptor {
    pub fn new(cfg: &MaskingConfig, mask_token: i64, vocab_size: i64) -> Result<Self, ModelError> {
        let probs = [("change_prob", cfg.change_prob), ("mask_prob", cfg.mask_prob), ("rand_prob", cfg.rand_prob)];
        if let Some((name, p)) = probs.iter().find(|(_, p)| !(0.0..=1.0).contains(p)) {
            return Err(ModelError::Config(format!("{name} must lie in [0, 1], got {p}")));
        }
        if cfg.mask_prob + cfg.rand_prob > 1.0 + f64::EPSILON {
            return Err(ModelError::Config(format!(
                "mask_prob + rand_prob = {} exceeds 1", cfg.mask_prob + cfg.rand_prob
            )));
        }
        if vocab_size < 0 {
            return Err(ModelError::Config(format!("vocab_size must be non-negative, got {vocab_size}")));
        }
        Ok(Self {
            change_prob: cfg.change_prob,
            mask_prob:   cfg.mask_prob,
            rand_prob:   cfg.rand_prob,
            mask_token,
            vocab_size,
        })
    }

    /// Largest id a corrupted batch can carry.
    pub fn max_id(&self) -> i64 {
        self.vocab_size.max(self.mask_token)
    }

    /// Fail unless every id this corruptor emits has a row in a
    /// `rows`-entry embedding table.
    pub fn check_table(&self, rows: usize) -> Result<(), ModelError> {
        if self.mask_token < 0 || self.max_id() as u64 >= rows as u64 {
            return Err(ModelError::Config(format!(
                "vocab_size {} / mask id {} need an embedding table of more than {} rows",
                self.vocab_size, self.mask_token, rows
            )));
        }
        Ok(())
    }

    /// Corrupt row-major `ids` (`rows x cols`) in place, honouring `attention`.
    pub fn corrupt_ids<R: Rng>(
        &self,
        ids:       &mut [i64],
        attention: &[i64],
        cols:      usize,
        rng:       &mut R,
    ) -> CorruptionStats {
        let mut stats = CorruptionStats::default();
        if cols == 0 {
            return stats;
        }

        for (row, mask) in ids.chunks_mut(cols).zip(attention.chunks(cols)) {
            let mut j = FIRST_ELIGIBLE;
            while j < cols && mask[j] != 0 {
                stats.eligible += 1;
                if rng.gen::<f64>() < self.change_prob {
                    let q = rng.gen::<f64>();
                    if q < self.mask_prob {
                        row[j] = self.mask_token;
                        stats.masked += 1;
                    } else if q < self.mask_prob + self.rand_prob {
                        row[j] = rng.gen_range(0..=self.vocab_size);
                        stats.randomized += 1;
                    } else {
                        stats.kept += 1;
                    }
                }
                j += 1;
            }
        }
        stats
    }

    /// Returns `(target, model_inputs)`: the untouched ids as target, and
    /// `[corrupted_ids, input[1], input[2], ...]` on `device`.
    pub fn corrupt<B: Backend, R: Rng>(
        &self,
        batch:  TensorBatch<B>,
        rng:    &mut R,
        device: &B::Device,
    ) -> Result<(Tensor<B, 2, Int>, Vec<GraphValue<B>>), ModelError> {
        let len = batch.data.len();
        if len <= MASK_INPUT {
            return Err(ModelError::MissingInput { index: MASK_INPUT, len });
        }

        let mut data = batch.data.into_iter();
        let ids      = data.next().ok_or(ModelError::MissingInput { index: 0, len })?.into_int2()?;
        let rest: Vec<DynTensor<B>> = data.collect();
        let attention = rest[MASK_INPUT - 1].clone().into_int2()?;

        let [rows, cols] = ids.dims();
        if attention.dims() != [rows, cols] {
            return Err(ModelError::RaggedField {
                slot:   MASK_INPUT,
                reason: format!("attention mask {:?} does not match ids {:?}", attention.dims(), [rows, cols]),
            });
        }

        let mut corrupted = host_ints(ids.clone())?;
        let attention     = host_ints(attention)?;
        let stats = self.corrupt_ids(&mut corrupted, &attention, cols, rng);
        tracing::debug!(
            "Masked LM batch: {} eligible, {} masked, {} randomized, {} kept",
            stats.eligible, stats.masked, stats.randomized, stats.kept
        );

        let target = ids.to_device(device);
        let mut inputs = Vec::with_capacity(len);
        inputs.push(DynTensor::tokens(corrupted, rows, cols, device).into());
        inputs.extend(rest.into_iter().map(|t| GraphValue::Tensor(t.to_device(device))));
        Ok((target, inputs))
    }
}

// ─── Masked-LM loss ───────────────────────────────────────────────────────────
/// Mean cross-entropy of `logits [b, s, v]` against the original ids `[b, s]`.
pub fn lm_loss<B: Backend>(
    logits: Tensor<B, 3>,
    target: Tensor<B, 2, Int>,
    device: &B::Device,
) -> Result<Tensor<B, 1>, ModelError> {
    let [b, s, v] = logits.dims();
    if target.dims() != [b, s] {
        return Err(ModelError::Data(format!(
            "targets {:?} do not match logits {:?}", target.dims(), [b, s, v]
        )));
    }
    check_ids(&target, v, "target")?;
    Ok(CrossEntropyLossConfig::new()
        .init(device)
        .forward(logits.reshape([b * s, v]), target.reshape([b * s])))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    type TestBackend = burn::backend::NdArray;

    const MASK: i64 = 103;
    const ROWS: usize = 3;
    const COLS: usize = 8;

    fn ids() -> Vec<i64> {
        (0..(ROWS * COLS) as i64).map(|i| 1000 + i).collect()
    }

    fn attention() -> Vec<i64> {
        vec![
            1, 1, 1, 1, 1, 1, 1, 1,
            1, 1, 1, 0, 0, 0, 0, 0,
            1, 0, 1, 1, 1, 1, 1, 1, // stops at position 1
        ]
    }

    fn corruptor(change: f64, mask: f64, rand: f64) -> MaskedBatchCorruptor {
        let cfg = MaskingConfig { change_prob: change, mask_prob: mask, rand_prob: rand, ..MaskingConfig::default() };
        MaskedBatchCorruptor::new(&cfg, MASK, 50).unwrap()
    }

    fn eligible(row: usize, col: usize) -> bool {
        let mask = attention();
        col >= 1 && (1..=col).all(|j| mask[row * COLS + j] != 0)
    }

    #[test]
    fn test_zero_change_prob_is_identity() {
        let c = corruptor(0.0, 0.8, 0.1);
        let mut got = ids();
        let stats = c.corrupt_ids(&mut got, &attention(), COLS, &mut StdRng::seed_from_u64(1));
        assert_eq!(got, ids());
        assert_eq!(stats.masked + stats.randomized + stats.kept, 0);
    }

    #[test]
    fn test_full_masking_hits_every_eligible_position() {
        let c = corruptor(1.0, 1.0, 0.0);
        let mut got = ids();
        let stats = c.corrupt_ids(&mut got, &attention(), COLS, &mut StdRng::seed_from_u64(2));

        for row in 0..ROWS {
            for col in 0..COLS {
                let v = got[row * COLS + col];
                if eligible(row, col) {
                    assert_eq!(v, MASK, "row {row} col {col}");
                } else {
                    assert_eq!(v, ids()[row * COLS + col], "row {row} col {col}");
                }
            }
        }
        assert_eq!(stats.masked, 7 + 2);
    }

    #[test]
    fn test_control_token_and_padding_untouched() {
        let c = corruptor(1.0, 0.5, 0.5);
        for seed in 0..20 {
            let mut got = ids();
            c.corrupt_ids(&mut got, &attention(), COLS, &mut StdRng::seed_from_u64(seed));
            for row in 0..ROWS {
                assert_eq!(got[row * COLS], ids()[row * COLS]);
                for col in 0..COLS {
                    if !eligible(row, col) {
                        assert_eq!(got[row * COLS + col], ids()[row * COLS + col]);
                    }
                }
            }
        }
    }

    #[test]
    fn test_same_seed_same_corruption() {
        let c = corruptor(0.5, 0.4, 0.3);
        let mut a = ids();
        let mut b = ids();
        c.corrupt_ids(&mut a, &attention(), COLS, &mut StdRng::seed_from_u64(9));
        c.corrupt_ids(&mut b, &attention(), COLS, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_random_ids_within_vocab() {
        let c = corruptor(1.0, 0.0, 1.0);
        let mut got = ids();
        c.corrupt_ids(&mut got, &attention(), COLS, &mut StdRng::seed_from_u64(4));
        assert!((1..COLS).all(|col| (0..=50).contains(&got[col])));
    }

    #[test]
    fn test_inner_distribution_rejected_when_over_one() {
        let cfg = MaskingConfig { mask_prob: 0.8, rand_prob: 0.3, ..MaskingConfig::default() };
        assert!(matches!(MaskedBatchCorruptor::new(&cfg, MASK, 10), Err(ModelError::Config(_))));
    }

    #[test]
    fn test_table_must_cover_emitted_ids() {
        let c = corruptor(0.15, 0.8, 0.1);
        assert_eq!(c.max_id(), MASK);
        assert!(c.check_table(104).is_ok());
        assert!(matches!(c.check_table(60), Err(ModelError::Config(_))));
    }

    #[test]
    fn test_lm_loss_rejects_targets_wider_than_logits() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 3>::zeros([1, 2, 4], &device);
        let ok     = DynTensor::<TestBackend>::tokens(vec![0, 3], 1, 2, &device).into_int2().unwrap();
        let loss   = lm_loss(logits.clone(), ok, &device).unwrap();
        approx::assert_abs_diff_eq!(loss.into_scalar().elem::<f64>(), 4f64.ln(), epsilon = 1e-5);

        let wide = DynTensor::<TestBackend>::tokens(vec![0, 7], 1, 2, &device).into_int2().unwrap();
        assert!(matches!(lm_loss(logits, wide, &device), Err(ModelError::Data(_))));
    }

    #[test]
    fn test_batch_assembly() {
        let device = Default::default();
        let batch  = TensorBatch::<TestBackend> {
            data: vec![
                DynTensor::tokens(ids(), ROWS, COLS, &device),
                DynTensor::tokens(vec![0; ROWS * COLS], ROWS, COLS, &device),
                DynTensor::tokens(attention(), ROWS, COLS, &device),
            ],
            target: vec![],
        };
        let c = corruptor(1.0, 1.0, 0.0);
        let (target, inputs) = c.corrupt(batch, &mut StdRng::seed_from_u64(0), &device).unwrap();

        assert_eq!(host_ints(target).unwrap(), ids());
        assert_eq!(inputs.len(), 3);
        let corrupted = host_ints(inputs[0].clone().into_tensor().unwrap().into_int2().unwrap()).unwrap();
        assert_eq!(corrupted[1], MASK);
        let mask = host_ints(inputs[2].clone().into_tensor().unwrap().into_int2().unwrap()).unwrap();
        assert_eq!(mask, attention());
    }

    #[test]
    fn test_batch_without_mask_rejected() {
        let device = Default::default();
        let batch  = TensorBatch::<TestBackend> {
            data:   vec![DynTensor::tokens(ids(), ROWS, COLS, &device)],
            target: vec![],
        };
        let err = corruptor(0.1, 0.8, 0.1)
            .corrupt(batch, &mut StdRng::seed_from_u64(0), &device)
            .unwrap_err();
        assert_eq!(err, ModelError::MissingInput { index: 2, len: 1 });
    }
}
