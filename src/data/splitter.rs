// ============================================================
// Layer 4 — Train/Test Splitter
// ============================================================
// Shuffles samples with a seeded Fisher-Yates pass and splits
// them into (train, test). The seed makes the split stable
// across runs so a later `predict --measure` sees the same
// held-out set training was evaluated on.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` with `seed` and split into (train, test).
///
/// `train_fraction` is clamped to `[0, 1]`; the split index is rounded.
pub fn split_train_test<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let fraction = train_fraction.clamp(0.0, 1.0);
    let split_at = ((total as f64) * fraction).round() as usize;
    let test     = samples.split_off(split_at.min(total));

    tracing::debug!(
        "Dataset split: {} training, {} test ({}% / {}%)",
        samples.len(),
        test.len(),
        (samples.len() * 100) / total.max(1),
        (test.len()    * 100) / total.max(1),
    );

    (samples, test)
}
